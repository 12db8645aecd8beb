use super::*;
use crate::common::error::TranslateError;
use cached_path::{Cache, Options, ProgressBar};
use dirs::cache_dir;
use lazy_static::lazy_static;
use std::path::PathBuf;

/// # Remote resource that will be downloaded and cached locally on demand
#[derive(PartialEq, Clone, Debug)]
pub struct RemoteResource {
    /// Remote path/url for the resource
    pub url: String,
    /// Local subdirectory of the cache root where this resource is saved
    pub cache_subdir: String,
}

impl RemoteResource {
    /// Creates a new RemoteResource from a `(cache subdirectory, url)` pair, as declared for the
    /// pretrained checkpoints (e.g. `T5ModelResources::T5_BASE`).
    ///
    /// # Example
    ///
    /// ```no_run
    /// use t5_translate::resources::RemoteResource;
    /// use t5_translate::t5::T5ModelResources;
    /// let model_resource = RemoteResource::from_pretrained(T5ModelResources::T5_BASE);
    /// ```
    pub fn from_pretrained(name_url_tuple: (&str, &str)) -> RemoteResource {
        let cache_subdir = name_url_tuple.0.to_string();
        let url = name_url_tuple.1.to_string();
        RemoteResource { url, cache_subdir }
    }
}

impl ResourceProvider for RemoteResource {
    /// Gets the local path for a remote resource.
    ///
    /// The remote resource is downloaded and cached. Then the path
    /// to the local cache is returned.
    fn get_local_path(&self) -> Result<PathBuf, TranslateError> {
        log::debug!("Resolving {} (cache: {})", self.url, self.cache_subdir);
        let cached_path = CACHE
            .cached_path_with_options(&self.url, &Options::default().subdir(&self.cache_subdir))?;
        Ok(cached_path)
    }
}

lazy_static! {
    #[derive(Copy, Clone, Debug)]
/// # Global cache directory
/// If the environment variable `T5_TRANSLATE_CACHE` is set, will save the cache model files at
/// that location. Otherwise defaults to `$XDG_CACHE_HOME/.t5-translate`, or corresponding user
/// cache for the current system.
    pub static ref CACHE: Cache = Cache::builder()
        .dir(_get_cache_directory())
        .progress_bar(Some(ProgressBar::Light))
        .build()
        .unwrap();
}

fn _get_cache_directory() -> PathBuf {
    match std::env::var("T5_TRANSLATE_CACHE") {
        Ok(value) => PathBuf::from(value),
        Err(_) => {
            let mut home = cache_dir().unwrap_or_else(std::env::temp_dir);
            home.push(".t5-translate");
            home
        }
    }
}
