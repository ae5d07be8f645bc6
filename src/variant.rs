use crate::data_space::DataSpace;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

/// Implementation style of a kernel variant.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum Style {
    /// Direct loop or hand-written device kernel.
    Base,
    /// Loop body passed as a function object.
    Lambda,
    /// Loop expressed with the `exec::forall` abstraction.
    Library,
}

/// Execution backend of a kernel variant.
///
/// Backends that are not compiled in do not exist.
#[derive(
    Debug,
    Clone,
    Copy,
    Hash,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
    Serialize,
    Deserialize,
)]
pub enum Backend {
    Seq,
    #[cfg(feature = "parallel")]
    Par,
    GridA,
    GridB,
}

#[derive(
    Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, strum::Display, Serialize, Deserialize,
)]
pub enum ConcurrencyModel {
    Sequential,
    HostParallel,
    AcceleratorGrid,
}

impl Backend {
    #[must_use]
    pub fn model(self) -> ConcurrencyModel {
        match self {
            Self::Seq => ConcurrencyModel::Sequential,
            #[cfg(feature = "parallel")]
            Self::Par => ConcurrencyModel::HostParallel,
            Self::GridA | Self::GridB => ConcurrencyModel::AcceleratorGrid,
        }
    }

    #[must_use]
    pub fn is_accelerator(self) -> bool {
        self.model() == ConcurrencyModel::AcceleratorGrid
    }

    /// Data space the kernel's working buffers live in.
    #[must_use]
    pub fn data_space(self) -> DataSpace {
        if self.is_accelerator() {
            DataSpace::AcceleratorGlobal
        } else {
            DataSpace::Host
        }
    }

    /// Data space for host-side results of this backend.
    #[must_use]
    pub fn host_space(self) -> DataSpace {
        if self.is_accelerator() {
            DataSpace::PinnedHost
        } else {
            DataSpace::Host
        }
    }

    #[must_use]
    pub fn host() -> Vec<Self> {
        Self::iter().filter(|backend| !backend.is_accelerator()).collect()
    }

    #[must_use]
    pub fn accelerators() -> Vec<Self> {
        Self::iter().filter(|backend| backend.is_accelerator()).collect()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid variant name {0:?}")]
pub struct ParseVariantError(pub String);

/// An (implementation style, backend) pair, named `<Style>_<Backend>`.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct VariantId {
    pub style: Style,
    pub backend: Backend,
}

impl VariantId {
    #[must_use]
    pub fn new(style: Style, backend: Backend) -> Self {
        Self { style, backend }
    }

    #[must_use]
    pub fn model(&self) -> ConcurrencyModel {
        self.backend.model()
    }

    /// All variants compiled into this build.
    pub fn all() -> impl Iterator<Item = Self> {
        Style::iter().flat_map(|style| Backend::iter().map(move |backend| Self::new(style, backend)))
    }
}

impl std::fmt::Display for VariantId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.style, self.backend)
    }
}

impl std::str::FromStr for VariantId {
    type Err = ParseVariantError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        let err = || ParseVariantError(name.to_string());
        let (style, backend) = name.split_once('_').ok_or_else(err)?;
        Ok(Self {
            style: style.parse().map_err(|_| err())?,
            backend: backend.parse().map_err(|_| err())?,
        })
    }
}

impl From<VariantId> for String {
    fn from(variant: VariantId) -> Self {
        variant.to_string()
    }
}

impl TryFrom<String> for VariantId {
    type Error = ParseVariantError;

    fn try_from(name: String) -> Result<Self, Self::Error> {
        name.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::{Backend, ConcurrencyModel, Style, VariantId};
    use crate::data_space::DataSpace;
    use color_eyre::eyre;

    #[test]
    fn test_variant_names() -> eyre::Result<()> {
        let variant = VariantId::new(Style::Library, Backend::GridA);
        assert_eq!(variant.to_string(), "Library_GridA");
        assert_eq!("Library_GridA".parse::<VariantId>()?, variant);
        assert_eq!("Base_Seq".parse::<VariantId>()?.model(), ConcurrencyModel::Sequential);
        assert!("Base".parse::<VariantId>().is_err());
        assert!("Base_Cuda".parse::<VariantId>().is_err());
        assert!("Fancy_Seq".parse::<VariantId>().is_err());
        Ok(())
    }

    #[test]
    fn test_backend_spaces() {
        assert_eq!(Backend::Seq.data_space(), DataSpace::Host);
        assert_eq!(Backend::GridB.data_space(), DataSpace::AcceleratorGlobal);
        assert_eq!(Backend::GridA.host_space(), DataSpace::PinnedHost);
        assert!(Backend::accelerators()
            .into_iter()
            .all(|backend| backend.model() == ConcurrencyModel::AcceleratorGrid));
    }

    #[test]
    fn test_all_variants_round_trip_through_names() -> eyre::Result<()> {
        for variant in VariantId::all() {
            assert_eq!(variant.to_string().parse::<VariantId>()?, variant);
        }
        Ok(())
    }

    #[test]
    fn test_serialize_as_name() -> eyre::Result<()> {
        let variant = VariantId::new(Style::Base, Backend::GridB);
        assert_eq!(serde_json::to_string(&variant)?, r#""Base_GridB""#);
        Ok(())
    }
}
