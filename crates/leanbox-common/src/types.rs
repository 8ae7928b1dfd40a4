//! Domain primitive types used across the leanbox workspace.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::{FREEZER_FREEZING, FREEZER_FROZEN, FREEZER_THAWED};
use crate::error::{LeanboxError, Result};

/// Name of a container template; doubles as the cgroup subgroup name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TemplateName(String);

impl TemplateName {
    /// Creates a template name.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is empty, `.`/`..`, or contains `/`,
    /// since it is used verbatim as a directory name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() || name == "." || name == ".." || name.contains('/') || name.contains('\0') {
            return Err(LeanboxError::Config {
                message: format!("invalid template name: {name:?}"),
            });
        }
        Ok(Self(name))
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TemplateName {
    type Error = LeanboxError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TemplateName> for String {
    fn from(name: TemplateName) -> Self {
        name.0
    }
}

impl FromStr for TemplateName {
    type Err = LeanboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for TemplateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A set of CPUs or NUMA nodes a template may use.
///
/// Deserializing goes through the same normalization as
/// [`ResourceRange::from_bounds`], so an inverted range read from a file
/// becomes [`ResourceRange::Unlimited`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "RawRange")]
pub enum ResourceRange {
    /// No restriction; the template inherits whatever its parent allows.
    #[default]
    Unlimited,
    /// The closed range `start..=end`.
    Bounded {
        /// First id in the range.
        start: u32,
        /// Last id in the range (inclusive).
        end: u32,
    },
}

impl ResourceRange {
    /// Creates a bounded range.
    ///
    /// # Errors
    ///
    /// Returns an error if `start > end`.
    pub fn bounded(start: u32, end: u32) -> Result<Self> {
        if start > end {
            return Err(LeanboxError::Config {
                message: format!("range start {start} is after end {end}"),
            });
        }
        Ok(Self::Bounded { start, end })
    }

    /// Converts signed legacy bounds, where negatives mean "no limit".
    ///
    /// Negative or inverted bounds collapse to [`ResourceRange::Unlimited`].
    #[must_use]
    pub fn from_bounds(start: i64, end: i64) -> Self {
        match (u32::try_from(start), u32::try_from(end)) {
            (Ok(start), Ok(end)) if start <= end => Self::Bounded { start, end },
            _ => {
                if start >= 0 || end >= 0 {
                    tracing::warn!(start, end, "malformed range, falling back to unlimited");
                }
                Self::Unlimited
            }
        }
    }

    /// Returns `true` if the range does not restrict anything.
    #[must_use]
    pub const fn is_unlimited(&self) -> bool {
        matches!(self, Self::Unlimited)
    }
}

/// Unchecked serde form of [`ResourceRange`].
#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum RawRange {
    Unlimited,
    Bounded { start: u32, end: u32 },
}

impl From<RawRange> for ResourceRange {
    fn from(raw: RawRange) -> Self {
        match raw {
            RawRange::Unlimited => Self::Unlimited,
            RawRange::Bounded { start, end } => {
                Self::from_bounds(i64::from(start), i64::from(end))
            }
        }
    }
}

impl fmt::Display for ResourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => f.write_str("unlimited"),
            Self::Bounded { start, end } => write!(f, "{start}-{end}"),
        }
    }
}

impl FromStr for ResourceRange {
    type Err = LeanboxError;

    /// Parses `"unlimited"`, a single id `"3"`, or `"start-end"`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") {
            return Ok(Self::Unlimited);
        }
        let parse = |v: &str| {
            v.trim().parse::<u32>().map_err(|e| LeanboxError::Config {
                message: format!("invalid range bound {v:?}: {e}"),
            })
        };
        match s.split_once('-') {
            Some((start, end)) => Self::bounded(parse(start)?, parse(end)?),
            None => {
                let id = parse(s)?;
                Ok(Self::Bounded { start: id, end: id })
            }
        }
    }
}

/// Resource limits of a template.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSpec {
    /// CPUs the template's instances may run on.
    pub cpus: ResourceRange,
    /// Hard memory ceiling in MiB; `None` leaves memory unrestricted.
    pub memory_mb: Option<u64>,
    /// NUMA nodes the template's instances may allocate from.
    pub numa_nodes: ResourceRange,
}

impl TemplateSpec {
    /// A spec that restricts nothing.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            cpus: ResourceRange::Unlimited,
            memory_mb: None,
            numa_nodes: ResourceRange::Unlimited,
        }
    }

    /// The memory ceiling to enforce, if any. A zero ceiling, which can
    /// only arrive through a struct literal or a spec file, restricts
    /// nothing.
    #[must_use]
    pub fn memory_limit_mb(&self) -> Option<u64> {
        self.memory_mb.filter(|&mb| mb > 0)
    }

    /// Sets the memory ceiling; zero means unrestricted.
    #[must_use]
    pub const fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = if memory_mb == 0 { None } else { Some(memory_mb) };
        self
    }

    /// Sets the CPU range.
    #[must_use]
    pub const fn with_cpus(mut self, cpus: ResourceRange) -> Self {
        self.cpus = cpus;
        self
    }

    /// Sets the NUMA node range.
    #[must_use]
    pub const fn with_numa_nodes(mut self, numa_nodes: ResourceRange) -> Self {
        self.numa_nodes = numa_nodes;
        self
    }
}

/// Run state of a template's group, shared by the freezer layer and the
/// container layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Members are runnable (`THAWED`).
    Running,
    /// The freezer is still suspending members (`FREEZING`).
    Pausing,
    /// Every member is suspended (`FROZEN`).
    Paused,
    /// The freezer state could not be read or parsed.
    Error,
}

impl RunState {
    /// Maps a freezer state token to a run state.
    #[must_use]
    pub fn from_freezer(token: &str) -> Self {
        match token.trim() {
            FREEZER_THAWED => Self::Running,
            FREEZER_FREEZING => Self::Pausing,
            FREEZER_FROZEN => Self::Paused,
            _ => Self::Error,
        }
    }

    /// The token to write to `freezer.state` to request this state, if the
    /// state can be requested at all.
    #[must_use]
    pub const fn freezer_token(self) -> Option<&'static str> {
        match self {
            Self::Running => Some(FREEZER_THAWED),
            Self::Paused => Some(FREEZER_FROZEN),
            Self::Pausing | Self::Error => None,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Pausing => write!(f, "pausing"),
            Self::Paused => write!(f, "paused"),
            Self::Error => write!(f, "error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_name_rejects_path_components() {
        assert!(TemplateName::new("t1").is_ok());
        assert!(TemplateName::new("").is_err());
        assert!(TemplateName::new("..").is_err());
        assert!(TemplateName::new("a/b").is_err());
    }

    #[test]
    fn bounded_range_displays_as_kernel_list() {
        let range = ResourceRange::bounded(0, 3).expect("valid range");
        assert_eq!(range.to_string(), "0-3");
    }

    #[test]
    fn inverted_range_is_rejected() {
        assert!(ResourceRange::bounded(4, 1).is_err());
    }

    #[test]
    fn legacy_negative_bounds_mean_unlimited() {
        assert_eq!(ResourceRange::from_bounds(-1, -1), ResourceRange::Unlimited);
        assert_eq!(ResourceRange::from_bounds(0, -1), ResourceRange::Unlimited);
    }

    #[test]
    fn legacy_inverted_bounds_fall_back_to_unlimited() {
        assert_eq!(ResourceRange::from_bounds(3, 1), ResourceRange::Unlimited);
        assert_eq!(
            ResourceRange::from_bounds(0, 1),
            ResourceRange::Bounded { start: 0, end: 1 }
        );
    }

    #[test]
    fn range_parses_cli_forms() {
        assert_eq!("unlimited".parse::<ResourceRange>().unwrap(), ResourceRange::Unlimited);
        assert_eq!(
            "2".parse::<ResourceRange>().unwrap(),
            ResourceRange::Bounded { start: 2, end: 2 }
        );
        assert_eq!(
            " 0-7 ".parse::<ResourceRange>().unwrap(),
            ResourceRange::Bounded { start: 0, end: 7 }
        );
        assert!("7-0".parse::<ResourceRange>().is_err());
        assert!("x-1".parse::<ResourceRange>().is_err());
    }

    #[test]
    fn zero_memory_means_unrestricted() {
        assert_eq!(TemplateSpec::unlimited().with_memory_mb(0).memory_mb, None);
        assert_eq!(TemplateSpec::unlimited().with_memory_mb(128).memory_mb, Some(128));
    }

    #[test]
    fn spec_file_cannot_smuggle_invalid_limits() {
        let spec: TemplateSpec = serde_json::from_str(
            r#"{"cpus":{"bounded":{"start":5,"end":1}},"memory_mb":0,"numa_nodes":"unlimited"}"#,
        )
        .expect("deserialize");
        assert_eq!(spec.cpus, ResourceRange::Unlimited);
        assert_eq!(spec.memory_limit_mb(), None);

        let spec: TemplateSpec = serde_json::from_str(
            r#"{"cpus":{"bounded":{"start":1,"end":5}},"memory_mb":64,"numa_nodes":"unlimited"}"#,
        )
        .expect("deserialize");
        assert_eq!(spec.cpus, ResourceRange::Bounded { start: 1, end: 5 });
        assert_eq!(spec.memory_limit_mb(), Some(64));
    }

    #[test]
    fn freezer_tokens_map_to_run_states() {
        assert_eq!(RunState::from_freezer("THAWED\n"), RunState::Running);
        assert_eq!(RunState::from_freezer("FREEZING"), RunState::Pausing);
        assert_eq!(RunState::from_freezer("FROZEN\n"), RunState::Paused);
        assert_eq!(RunState::from_freezer("garbage"), RunState::Error);
    }

    #[test]
    fn only_stable_states_have_tokens() {
        assert_eq!(RunState::Paused.freezer_token(), Some("FROZEN"));
        assert_eq!(RunState::Running.freezer_token(), Some("THAWED"));
        assert_eq!(RunState::Pausing.freezer_token(), None);
        assert_eq!(RunState::Error.freezer_token(), None);
    }

    #[test]
    fn spec_roundtrips_through_json() {
        let spec = TemplateSpec::unlimited()
            .with_memory_mb(128)
            .with_cpus(ResourceRange::Bounded { start: 0, end: 1 });
        let json = serde_json::to_string(&spec).expect("serialize");
        let back: TemplateSpec = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, spec);
    }
}
