//! Stages of the deferred pipeline and the images it can produce

use std::fmt;

/// Where the scheduler is in its stage machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Stage {
    /// Nothing built yet
    #[default]
    None,
    /// Modules built, no render running
    Compiled,
    HitAndNormals,
    Ao,
    ShadowsAndMaterials,
    Reflection,
    /// The last render completed, failed or was cancelled
    Finished,
}

impl Stage {
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Compiled => "compiled",
            Self::HitAndNormals => "hit_and_normals",
            Self::Ao => "ao",
            Self::ShadowsAndMaterials => "shadows_and_materials",
            Self::Reflection => "reflection",
            Self::Finished => "finished",
        }
    }

    /// Whether a render is in progress
    pub fn is_rendering(self) -> bool {
        matches!(
            self,
            Self::HitAndNormals | Self::Ao | Self::ShadowsAndMaterials | Self::Reflection
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Image a render delivers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OutputType {
    #[default]
    FinalImage,
    /// Hit distance, normalized by the far plane
    DepthMap,
    Ao,
    Shadows,
    /// In-scattered fog light
    FogDensity,
}

impl OutputType {
    /// The stage after which the output is complete
    pub fn producing_stage(self) -> Stage {
        match self {
            Self::FinalImage => Stage::Reflection,
            Self::DepthMap => Stage::HitAndNormals,
            Self::Ao => Stage::Ao,
            Self::Shadows | Self::FogDensity => Stage::ShadowsAndMaterials,
        }
    }

    pub fn is_auxiliary(self) -> bool {
        self != Self::FinalImage
    }
}

impl std::str::FromStr for OutputType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "final" | "image" | "final-image" => Ok(Self::FinalImage),
            "depth" | "depth-map" => Ok(Self::DepthMap),
            "ao" => Ok(Self::Ao),
            "shadows" | "shadow" => Ok(Self::Shadows),
            "fog" | "fog-density" => Ok(Self::FogDensity),
            _ => Err(format!("Unknown output type: {s}")),
        }
    }
}
