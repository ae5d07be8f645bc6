use crate::config::Config;
use crate::data_space::DataSpace;
use crate::error::Error;
use crate::variant::Backend;
use exec::DeviceProperties;

pub fn get_num_threads() -> Result<Option<usize>, std::num::ParseIntError> {
    let count = std::env::var("NUM_THREADS")
        .ok()
        .as_deref()
        .map(str::parse)
        .transpose()?;
    Ok(count)
}

#[cfg(feature = "parallel")]
pub fn rayon_pool(num_threads: usize) -> Result<rayon::ThreadPool, rayon::ThreadPoolBuildError> {
    rayon::ThreadPoolBuilder::new()
        .thread_name(|idx| format!("host-worker-{idx}"))
        .num_threads(num_threads)
        .build()
}

/// Shared environment of all variant runs of a suite run.
pub struct Harness<'a> {
    config: &'a Config,
    num_threads: usize,
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
}

impl<'a> std::fmt::Debug for Harness<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Harness")
            .field("num_threads", &self.num_threads)
            .finish_non_exhaustive()
    }
}

impl<'a> Harness<'a> {
    /// Create the harness.
    ///
    /// The number of host threads defaults to `NUM_THREADS` or the number of
    /// physical cores.
    pub fn new(config: &'a Config, num_threads: Option<usize>) -> Result<Self, Error> {
        let num_threads = match num_threads {
            Some(num_threads) => num_threads,
            None => get_num_threads()?.unwrap_or_else(num_cpus::get_physical),
        }
        .max(1);
        log::debug!("using {num_threads} host threads");
        Ok(Self {
            config,
            num_threads,
            #[cfg(feature = "parallel")]
            pool: rayon_pool(num_threads)?,
        })
    }

    #[must_use]
    pub fn config(&self) -> &'a Config {
        self.config
    }

    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    #[must_use]
    pub fn device(&self, backend: Backend) -> Option<&'a DeviceProperties> {
        self.config.devices.get(backend)
    }

    #[must_use]
    pub fn memory_limits(&self, backend: Backend) -> Vec<(DataSpace, u64)> {
        self.config.memory_limits(backend)
    }

    /// Run `f` inside the host thread pool.
    pub fn install<R, F>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        #[cfg(feature = "parallel")]
        {
            self.pool.install(f)
        }
        #[cfg(not(feature = "parallel"))]
        {
            f()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Harness;
    use crate::config::Config;
    use crate::variant::Backend;
    use color_eyre::eyre;

    #[test]
    fn test_harness() -> eyre::Result<()> {
        let config = Config::default();
        let harness = Harness::new(&config, Some(3))?;
        assert_eq!(harness.num_threads(), 3);
        assert_eq!(harness.device(Backend::GridB).map(|d| d.warp_size), Some(64));
        assert!(harness.device(Backend::Seq).is_none());
        #[cfg(feature = "parallel")]
        assert_eq!(harness.install(rayon::current_num_threads), 3);
        Ok(())
    }
}
