use crate::data_space::DataSpace;
use crate::error::Error;
use crate::tuning::TuningConfig;
use crate::variant::{Backend, VariantId};
use exec::DeviceProperties;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Selects a tuning by its index or its name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TuningSelection {
    Index(usize),
    Name(String),
}

impl TuningSelection {
    #[must_use]
    pub fn matches(&self, tuning: &TuningConfig) -> bool {
        match self {
            Self::Index(index) => tuning.index == *index,
            Self::Name(name) => tuning.name == *name,
        }
    }
}

impl std::str::FromStr for TuningSelection {
    type Err = std::convert::Infallible;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Ok(match value.parse() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(value.to_string()),
        })
    }
}

/// Parameters of a suite run.
///
/// Empty lists select everything.
#[derive(Debug, Clone, Default, PartialEq, clap::Args, Serialize, Deserialize)]
#[serde(default)]
pub struct RunParams {
    /// Number of timed repetitions (default: per kernel)
    #[arg(long = "reps")]
    pub reps: Option<usize>,

    /// Problem size (default: per kernel)
    #[arg(long = "size")]
    pub size: Option<usize>,

    /// Factor applied to the problem size
    #[arg(long = "size-factor")]
    pub size_factor: Option<f64>,

    /// Block sizes of accelerator tunings
    #[arg(long = "block-size", value_delimiter = ',')]
    pub block_sizes: Vec<u32>,

    /// Kernels (or kernel groups) to run
    #[arg(long = "kernel", value_delimiter = ',')]
    pub kernels: Vec<String>,

    /// Kernels (or kernel groups) to skip
    #[arg(long = "exclude-kernel", value_delimiter = ',')]
    pub exclude_kernels: Vec<String>,

    /// Variants to run, e.g. `Base_Seq`
    #[arg(long = "variant", value_delimiter = ',')]
    pub variants: Vec<String>,

    /// Variants to skip
    #[arg(long = "exclude-variant", value_delimiter = ',')]
    pub exclude_variants: Vec<String>,

    /// Tunings to run, by index or name
    #[arg(long = "tuning", value_delimiter = ',')]
    pub tunings: Vec<TuningSelection>,

    /// Variant whose checksum the others are compared against
    #[arg(long = "reference-variant")]
    pub reference_variant: Option<String>,

    /// Number of passes over all selected kernels
    #[arg(long = "passes")]
    pub passes: Option<usize>,

    /// Run one untimed repetition before timing
    #[arg(long = "warmup")]
    pub warmup: bool,

    /// Number of host threads for parallel variants
    #[arg(short = 'j', long = "threads")]
    pub threads: Option<usize>,
}

impl RunParams {
    /// Parameters of `other` override the ones of `self`.
    #[must_use]
    pub fn merge(mut self, other: &Self) -> Self {
        fn merge_list<T: Clone>(list: &mut Vec<T>, other: &[T]) {
            if !other.is_empty() {
                *list = other.to_vec();
            }
        }
        self.reps = other.reps.or(self.reps);
        self.size = other.size.or(self.size);
        self.size_factor = other.size_factor.or(self.size_factor);
        merge_list(&mut self.block_sizes, &other.block_sizes);
        merge_list(&mut self.kernels, &other.kernels);
        merge_list(&mut self.exclude_kernels, &other.exclude_kernels);
        merge_list(&mut self.variants, &other.variants);
        merge_list(&mut self.exclude_variants, &other.exclude_variants);
        merge_list(&mut self.tunings, &other.tunings);
        self.reference_variant = other
            .reference_variant
            .clone()
            .or(self.reference_variant);
        self.passes = other.passes.or(self.passes);
        self.warmup |= other.warmup;
        self.threads = other.threads.or(self.threads);
        self
    }

    #[must_use]
    pub fn passes(&self) -> usize {
        self.passes.unwrap_or(1).max(1)
    }

    #[must_use]
    pub fn reps(&self, default_reps: usize) -> usize {
        self.reps.unwrap_or(default_reps)
    }

    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn problem_size(&self, default_size: usize) -> usize {
        let size = self.size.unwrap_or(default_size);
        match self.size_factor {
            Some(factor) => ((size as f64 * factor).round() as usize).max(1),
            None => size,
        }
    }

    #[must_use]
    pub fn selects_kernel(&self, name: &str, group: &str) -> bool {
        let matches = |selected: &String| selected == name || selected == group;
        (self.kernels.is_empty() || self.kernels.iter().any(matches))
            && !self.exclude_kernels.iter().any(matches)
    }

    #[must_use]
    pub fn selects_variant(&self, variant: &VariantId) -> bool {
        let name = variant.to_string();
        (self.variants.is_empty() || self.variants.contains(&name))
            && !self.exclude_variants.contains(&name)
    }

    #[must_use]
    pub fn selects_tuning(&self, tuning: &TuningConfig) -> bool {
        self.tunings.is_empty() || self.tunings.iter().any(|sel| sel.matches(tuning))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Devices {
    pub grid_a: DeviceProperties,
    pub grid_b: DeviceProperties,
}

impl Default for Devices {
    fn default() -> Self {
        Self {
            grid_a: DeviceProperties::grid_a(),
            grid_b: DeviceProperties::grid_b(),
        }
    }
}

impl Devices {
    #[must_use]
    pub fn get(&self, backend: Backend) -> Option<&DeviceProperties> {
        match backend {
            Backend::GridA => Some(&self.grid_a),
            Backend::GridB => Some(&self.grid_b),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub run: RunParams,
    /// Candidate block sizes of accelerator tunings.
    pub gpu_block_sizes: Vec<u32>,
    pub devices: Devices,
    /// Capacity per data space in bytes.
    ///
    /// Accelerator spaces default to the device memory size.
    pub memory_limits: IndexMap<DataSpace, u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            run: RunParams::default(),
            gpu_block_sizes: vec![64, 128, 256, 512, 1024],
            devices: Devices::default(),
            memory_limits: IndexMap::new(),
        }
    }
}

impl Config {
    pub fn from_reader(reader: impl std::io::Read) -> Result<Self, Error> {
        Ok(serde_yaml::from_reader(reader)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file = std::fs::File::open(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_reader(std::io::BufReader::new(file))
    }

    /// Capacity limits of all data spaces usable by `backend`.
    #[must_use]
    pub fn memory_limits(&self, backend: Backend) -> Vec<(DataSpace, u64)> {
        let mut limits: IndexMap<DataSpace, u64> = IndexMap::new();
        if let Some(device) = self.devices.get(backend) {
            limits.insert(DataSpace::AcceleratorGlobal, device.memory_bytes);
            limits.insert(DataSpace::Managed, device.memory_bytes);
        }
        limits.extend(self.memory_limits.iter().map(|(space, bytes)| (*space, *bytes)));
        limits.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, RunParams, TuningSelection};
    use crate::data_space::DataSpace;
    use crate::tuning::TuningConfig;
    use crate::variant::{Backend, Style, VariantId};
    use clap::Parser;
    use color_eyre::eyre;
    use similar_asserts as diff;

    #[derive(Debug, Parser)]
    struct Options {
        #[command(flatten)]
        run: RunParams,
    }

    #[test]
    fn test_parse_cli() {
        let options = Options::parse_from([
            "test",
            "--reps",
            "3",
            "--variant",
            "Base_Seq,Library_GridA",
            "--tuning",
            "2,block_256",
            "--warmup",
        ]);
        diff::assert_eq!(
            have: options.run,
            want: RunParams {
                reps: Some(3),
                variants: vec!["Base_Seq".to_string(), "Library_GridA".to_string()],
                tunings: vec![
                    TuningSelection::Index(2),
                    TuningSelection::Name("block_256".to_string())
                ],
                warmup: true,
                ..RunParams::default()
            }
        );
    }

    #[test]
    fn test_merge_overrides() {
        let base = RunParams {
            reps: Some(10),
            size: Some(100),
            kernels: vec!["PI_REDUCE".to_string()],
            ..RunParams::default()
        };
        let cli = RunParams {
            reps: Some(2),
            block_sizes: vec![128],
            ..RunParams::default()
        };
        let merged = base.merge(&cli);
        assert_eq!(merged.reps, Some(2));
        assert_eq!(merged.size, Some(100));
        assert_eq!(merged.block_sizes, vec![128]);
        assert_eq!(merged.kernels, vec!["PI_REDUCE".to_string()]);
        assert_eq!(merged.passes(), 1);
    }

    #[test]
    fn test_selection() {
        let params = RunParams {
            kernels: vec!["Basic".to_string()],
            exclude_kernels: vec!["PI_REDUCE".to_string()],
            exclude_variants: vec!["Base_GridB".to_string()],
            tunings: vec![TuningSelection::Name("default".to_string())],
            size: Some(1000),
            size_factor: Some(0.5),
            ..RunParams::default()
        };
        assert!(params.selects_kernel("STREAM_TRIAD", "Basic"));
        assert!(!params.selects_kernel("PI_REDUCE", "Basic"));
        assert!(!params.selects_kernel("FLOYD_WARSHALL", "Polybench"));
        assert!(params.selects_variant(&VariantId::new(Style::Base, Backend::GridA)));
        assert!(!params.selects_variant(&VariantId::new(Style::Base, Backend::GridB)));
        assert!(params.selects_tuning(&TuningConfig::host_default()));
        assert_eq!(params.problem_size(10), 500);
    }

    #[test]
    fn test_load_yaml() -> eyre::Result<()> {
        let yaml = r"
run:
  reps: 5
  variants: [Base_Seq]
  tunings: [0, occgs_128]
gpu_block_sizes: [128, 256]
memory_limits:
  AcceleratorGlobal: 4096
";
        let config = Config::from_reader(yaml.as_bytes())?;
        assert_eq!(config.run.reps, Some(5));
        diff::assert_eq!(
            have: config.run.tunings,
            want: vec![
                TuningSelection::Index(0),
                TuningSelection::Name("occgs_128".to_string())
            ]
        );
        assert_eq!(config.gpu_block_sizes, vec![128, 256]);
        diff::assert_eq!(
            have: config.memory_limits(Backend::GridA),
            want: vec![
                (DataSpace::AcceleratorGlobal, 4096),
                (DataSpace::Managed, 8 * 1024 * 1024 * 1024),
            ]
        );
        assert!(config.memory_limits(Backend::Seq).len() == 1);
        Ok(())
    }
}
