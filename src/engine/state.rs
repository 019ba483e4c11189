// Steps of a single repack run, in the order they happen.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Locating,
    Validating,
    Transforming,
    Building,
    CleaningUp,
}

impl Stage {
    /// Short key used as the progress `stage` tag.
    pub fn key(self) -> &'static str {
        match self {
            Stage::Extracting => "extract",
            Stage::Locating => "locate",
            Stage::Validating => "validate",
            Stage::Transforming => "transform",
            Stage::Building => "build",
            Stage::CleaningUp => "cleanup",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Extracting => "Extracting archive...",
            Stage::Locating => "Looking for the manifest...",
            Stage::Validating => "Checking extension identity...",
            Stage::Transforming => "Rewriting URL patterns...",
            Stage::Building => "Building archive...",
            Stage::CleaningUp => "Removing working directory...",
        }
    }
}
