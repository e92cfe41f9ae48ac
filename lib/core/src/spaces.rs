//! Spatial references: the spaces outputs are resampled into.
//!
//! Spaces are written as whitespace-separated tokens, e.g.
//! `T1w MNI152NLin2009cAsym:res-2 fsaverage5`. Template tokens accept
//! `res-` and `cohort-` modifiers after a colon. Grayordinates are written
//! as `cifti:<density>`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Templates known to the template cache.
pub const KNOWN_TEMPLATES: &[&str] = &[
    "MNI152Lin",
    "MNI152NLin2009cAsym",
    "MNI152NLin2009cSym",
    "MNI152NLin6Asym",
    "MNI152NLin6Sym",
    "MNI305",
    "MNIColin27",
    "MNIInfant",
    "MNIPediatricAsym",
    "NKI",
    "OASIS30ANTs",
    "PNC",
    "UNCInfant",
    "WHS",
    "fsLR",
];

/// Template consumed by ICA-AROMA.
pub const AROMA_TEMPLATE: &str = "MNI152NLin6Asym";

/// Mesh CIFTI surfaces are sampled on before resampling to fsLR.
pub const CIFTI_SURFACE: &str = "fsaverage5";

/// Errors raised while parsing or assembling spatial references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpaceError {
    /// No spaces were requested.
    Empty,
    /// A token is not a recognised space.
    UnknownSpace { token: String },
    /// A template modifier is malformed (`res-`, `cohort-`).
    InvalidModifier { token: String, modifier: String },
    /// Only grayordinates were requested; they need a volumetric or surface
    /// space to be produced from.
    NoResamplingTarget,
}

impl fmt::Display for SpaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "at least one output space must be requested"),
            Self::UnknownSpace { token } => write!(f, "unknown space '{token}'"),
            Self::InvalidModifier { token, modifier } => {
                write!(f, "invalid modifier '{modifier}' in space '{token}'")
            }
            Self::NoResamplingTarget => write!(
                f,
                "grayordinates require an anatomical, template or surface space"
            ),
        }
    }
}

impl std::error::Error for SpaceError {}

/// A reference space.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Space {
    /// The subject's T1w space.
    Anatomical,
    /// A standard template with optional resolution and cohort.
    Template {
        name: String,
        resolution: Option<String>,
        cohort: Option<String>,
    },
    /// A FreeSurfer surface (`fsnative` or an `fsaverage*` mesh).
    Surface { mesh: String },
    /// CIFTI grayordinates at a density (`91k`, `170k`).
    Grayordinates { density: String },
}

impl Space {
    /// Creates a template space without modifiers.
    #[must_use]
    pub fn template(name: impl Into<String>) -> Self {
        Self::Template {
            name: name.into(),
            resolution: None,
            cohort: None,
        }
    }

    /// Creates a template space with a resolution modifier.
    #[must_use]
    pub fn template_res(name: impl Into<String>, resolution: impl Into<String>) -> Self {
        Self::Template {
            name: name.into(),
            resolution: Some(resolution.into()),
            cohort: None,
        }
    }

    /// Whether this is a standard template.
    #[must_use]
    pub fn is_template(&self) -> bool {
        matches!(self, Self::Template { .. })
    }

    /// Whether this is a FreeSurfer surface space.
    #[must_use]
    pub fn is_surface(&self) -> bool {
        matches!(self, Self::Surface { .. })
    }

    /// The value of the `space-` entity in derivative names.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Anatomical => "T1w",
            Self::Template { name, .. } => name,
            Self::Surface { mesh } => mesh,
            Self::Grayordinates { .. } => "fsLR",
        }
    }

    /// Entities added to derivative names besides `space-`.
    #[must_use]
    pub fn extra_entities(&self) -> Vec<(&'static str, String)> {
        match self {
            Self::Template {
                resolution, cohort, ..
            } => {
                let mut entities = Vec::new();
                if let Some(cohort) = cohort {
                    entities.push(("cohort", cohort.clone()));
                }
                if let Some(res) = resolution {
                    entities.push(("res", res.clone()));
                }
                entities
            }
            Self::Grayordinates { density } => vec![("den", density.clone())],
            Self::Anatomical | Self::Surface { .. } => Vec::new(),
        }
    }

    /// An identifier usable inside workflow and node names
    /// (`MNI152NLin2009cAsym_res2`).
    #[must_use]
    pub fn tag(&self) -> String {
        let mut tag = self.name().to_string();
        for (key, value) in self.extra_entities() {
            tag.push('_');
            tag.push_str(key);
            tag.push_str(&value);
        }
        tag.replace(|c: char| !c.is_ascii_alphanumeric() && c != '_', "")
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anatomical => write!(f, "T1w"),
            Self::Template {
                name,
                resolution,
                cohort,
            } => {
                write!(f, "{name}")?;
                if let Some(cohort) = cohort {
                    write!(f, ":cohort-{cohort}")?;
                }
                if let Some(res) = resolution {
                    write!(f, ":res-{res}")?;
                }
                Ok(())
            }
            Self::Surface { mesh } => write!(f, "{mesh}"),
            Self::Grayordinates { density } => write!(f, "cifti:{density}"),
        }
    }
}

impl FromStr for Space {
    type Err = SpaceError;

    fn from_str(token: &str) -> Result<Self, Self::Err> {
        let unknown = || SpaceError::UnknownSpace {
            token: token.to_string(),
        };

        if token == "T1w" || token == "anat" {
            return Ok(Self::Anatomical);
        }
        if token == "fsnative" || token.starts_with("fsaverage") {
            let suffix = token.trim_start_matches("fsaverage");
            if token != "fsnative" && !suffix.chars().all(|c| c.is_ascii_digit()) {
                return Err(unknown());
            }
            return Ok(Self::Surface {
                mesh: token.to_string(),
            });
        }
        if let Some(density) = token.strip_prefix("cifti:") {
            return match density {
                "91k" | "170k" => Ok(Self::Grayordinates {
                    density: density.to_string(),
                }),
                _ => Err(unknown()),
            };
        }

        let mut parts = token.split(':');
        let name = parts.next().unwrap_or_default();
        if !KNOWN_TEMPLATES.contains(&name) {
            return Err(unknown());
        }

        let mut resolution = None;
        let mut cohort = None;
        for modifier in parts {
            let invalid = || SpaceError::InvalidModifier {
                token: token.to_string(),
                modifier: modifier.to_string(),
            };
            let (key, value) = modifier.split_once('-').ok_or_else(invalid)?;
            if value.is_empty() {
                return Err(invalid());
            }
            match key {
                "res" => resolution = Some(value.to_string()),
                "cohort" => cohort = Some(value.to_string()),
                _ => return Err(invalid()),
            }
        }

        Ok(Self::Template {
            name: name.to_string(),
            resolution,
            cohort,
        })
    }
}

/// A requested space and whether it is an output or only used internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub space: Space,
    /// Derivatives are written for output references only.
    pub output: bool,
}

/// The set of spaces attached to a run.
///
/// Serialized as the whitespace-separated tokens of its output references;
/// internal references are derived from workflow flags at build time and
/// are never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpatialReferences {
    references: Vec<Reference>,
}

impl SpatialReferences {
    /// Creates references from output spaces, dropping duplicates.
    ///
    /// # Errors
    ///
    /// Returns [`SpaceError::Empty`] for an empty set and
    /// [`SpaceError::NoResamplingTarget`] when only grayordinates are listed.
    pub fn new(spaces: impl IntoIterator<Item = Space>) -> Result<Self, SpaceError> {
        let mut references: Vec<Reference> = Vec::new();
        for space in spaces {
            if !references.iter().any(|r| r.space == space) {
                references.push(Reference {
                    space,
                    output: true,
                });
            }
        }

        if references.is_empty() {
            return Err(SpaceError::Empty);
        }
        if references
            .iter()
            .all(|r| matches!(r.space, Space::Grayordinates { .. }))
        {
            return Err(SpaceError::NoResamplingTarget);
        }

        Ok(Self { references })
    }

    /// Parses whitespace-separated tokens.
    ///
    /// # Errors
    ///
    /// Returns the first token error, or the errors of [`SpatialReferences::new`].
    pub fn parse(tokens: &str) -> Result<Self, SpaceError> {
        let spaces = tokens
            .split_whitespace()
            .map(str::parse)
            .collect::<Result<Vec<Space>, _>>()?;
        Self::new(spaces)
    }

    /// Adds a non-output reference unless the space is already present.
    pub fn add_internal(&mut self, space: Space) {
        if !self.references.iter().any(|r| r.space == space) {
            self.references.push(Reference {
                space,
                output: false,
            });
        }
    }

    /// Adds the references needed by ICA-AROMA and CIFTI outputs.
    pub fn add_internal_for(&mut self, use_aroma: bool, cifti: bool) {
        if use_aroma || cifti {
            self.add_internal(Space::template_res(AROMA_TEMPLATE, "2"));
        }
        if cifti {
            self.add_internal(Space::Surface {
                mesh: CIFTI_SURFACE.to_string(),
            });
        }
    }

    /// All references, outputs first in request order.
    pub fn references(&self) -> impl Iterator<Item = &Reference> {
        self.references.iter()
    }

    /// Output spaces in request order.
    pub fn outputs(&self) -> impl Iterator<Item = &Space> {
        self.references
            .iter()
            .filter(|r| r.output)
            .map(|r| &r.space)
    }

    /// Whether `space` is requested as an output.
    #[must_use]
    pub fn is_output(&self, space: &Space) -> bool {
        self.references
            .iter()
            .any(|r| r.output && &r.space == space)
    }

    /// Every template reference (output and internal).
    #[must_use]
    pub fn templates(&self) -> Vec<&Reference> {
        self.references
            .iter()
            .filter(|r| r.space.is_template())
            .collect()
    }

    /// Every surface reference (output and internal).
    #[must_use]
    pub fn surfaces(&self) -> Vec<&Space> {
        self.references
            .iter()
            .filter(|r| r.space.is_surface())
            .map(|r| &r.space)
            .collect()
    }

    /// The requested grayordinates density, if any.
    #[must_use]
    pub fn grayordinates(&self) -> Option<&str> {
        self.references.iter().find_map(|r| match &r.space {
            Space::Grayordinates { density } => Some(density.as_str()),
            _ => None,
        })
    }

    /// Whether the anatomical space is an output.
    #[must_use]
    pub fn anatomical_output(&self) -> bool {
        self.is_output(&Space::Anatomical)
    }
}

impl fmt::Display for SpatialReferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tokens: Vec<String> = self.outputs().map(ToString::to_string).collect();
        write!(f, "{}", tokens.join(" "))
    }
}

impl TryFrom<String> for SpatialReferences {
    type Error = SpaceError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SpatialReferences> for String {
    fn from(value: SpatialReferences) -> Self {
        value.to_string()
    }
}
