//! Build-time check for executables required by a graph.

use crate::graph::FlatGraph;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fmt;
use std::path::Path;

/// Operations whose executable is not on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingDependencies {
    /// `(operation, command)` pairs, sorted and unique.
    pub missing: Vec<(String, String)>,
}

impl fmt::Display for MissingDependencies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing runtime dependencies:")?;
        for (interface, command) in &self.missing {
            write!(f, "\n  {interface}: {command}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MissingDependencies {}

/// Checks that every command used by `graph` resolves through `path`
/// (a `PATH`-style list of directories).
///
/// # Errors
///
/// Returns every unresolved `(operation, command)` pair in one error.
pub fn check_dependencies(graph: &FlatGraph, path: &OsStr) -> Result<(), MissingDependencies> {
    let dirs: Vec<_> = std::env::split_paths(path).collect();
    check_dependencies_with(graph, |command| {
        dirs.iter().any(|dir| is_executable(&dir.join(command)))
    })
}

/// Like [`check_dependencies`], with a custom resolver.
///
/// # Errors
///
/// Returns every `(operation, command)` pair the resolver rejects.
pub fn check_dependencies_with<F>(graph: &FlatGraph, mut resolves: F) -> Result<(), MissingDependencies>
where
    F: FnMut(&str) -> bool,
{
    let mut missing = BTreeSet::new();
    for flat in graph.nodes() {
        let interface = &flat.node.interface;
        if let Some(command) = interface.command()
            && !resolves(command)
        {
            missing.insert((interface.name().to_string(), command.to_string()));
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MissingDependencies {
            missing: missing.into_iter().collect(),
        })
    }
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Workflow;
    use crate::interface::Interface;
    use crate::node::Node;
    use crate::port::{InputPort, OutputPort, PortKind};

    #[derive(Debug)]
    struct Tool(&'static str, &'static str);

    impl Interface for Tool {
        fn name(&self) -> &str {
            self.0
        }

        fn inputs(&self) -> Vec<InputPort> {
            vec![InputPort::optional("in_file", PortKind::File)]
        }

        fn outputs(&self) -> Vec<OutputPort> {
            vec![OutputPort::new("out_file", PortKind::File)]
        }

        fn command(&self) -> Option<&str> {
            Some(self.1)
        }
    }

    fn graph() -> FlatGraph {
        let mut wf = Workflow::new("wf");
        wf.add_nodes([
            Node::new("mcflirt", Tool("MCFLIRT", "mcflirt")),
            Node::new("flirt", Tool("FLIRT", "flirt")),
            Node::new("flirt_bbr", Tool("FLIRT", "flirt")),
        ])
        .expect("add");
        wf.flatten().expect("flatten")
    }

    #[test]
    fn missing_commands_are_collected_once() {
        let err = check_dependencies_with(&graph(), |command| command == "mcflirt").unwrap_err();
        assert_eq!(err.missing, vec![("FLIRT".to_string(), "flirt".to_string())]);
        assert!(err.to_string().contains("FLIRT: flirt"));
    }

    #[test]
    fn all_resolved_is_ok() {
        assert!(check_dependencies_with(&graph(), |_| true).is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn resolves_executables_on_path() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["mcflirt", "flirt"] {
            let path = dir.path().join(name);
            std::fs::write(&path, "#!/bin/sh\n").expect("write");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        assert!(check_dependencies(&graph(), dir.path().as_os_str()).is_ok());

        let empty = tempfile::tempdir().expect("tempdir");
        let err = check_dependencies(&graph(), empty.path().as_os_str()).unwrap_err();
        assert_eq!(err.missing.len(), 2);
    }
}
