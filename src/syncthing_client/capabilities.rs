use semver::Version;
use tracing::warn;

use super::api::SystemVersion;

const DEVICE_PAUSE_RESUME_SINCE: Version = Version::new(0, 12, 0);

/// Feature flags derived from the daemon's reported version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub supports_device_pause_resume: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            supports_device_pause_resume: true,
        }
    }

    pub fn from_version(version: &SystemVersion) -> Self {
        match parse_version(&version.version) {
            Some(parsed) => Self {
                supports_device_pause_resume: parsed >= DEVICE_PAUSE_RESUME_SINCE,
            },
            None => {
                warn!(version = %version.version, "Unparseable Syncthing version, assuming no optional capabilities");
                Self::default()
            }
        }
    }
}

/// Parses `v1.27.3`, `v1.27.3-rc.1` and dev builds such as `v1.27.3+12-gabcdef`.
fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches('v');
    Version::parse(trimmed).ok().map(|mut version| {
        version.pre = semver::Prerelease::EMPTY;
        version.build = semver::BuildMetadata::EMPTY;
        version
    })
}
