//! # Resource definitions for model weights, vocabularies and configuration files
//!
//! A T5 translation model needs three files:
//! - model weights (`rust_model.ot`)
//! - configuration file (`config.json`)
//! - SentencePiece model (`spiece.model`)
//!
//! Two types of resources are available to reference them:
//! - LocalResource: points to a local file
//! - RemoteResource: points to a remote file via a URL, downloaded and cached on first use
//!   (requires the `remote` feature)
//!
//! For both types of resources, the local location of the file can be retrieved using
//! `get_local_path`, allowing to reference the resource file location regardless if it is a remote
//! or local resource. Pretrained T5 checkpoints are declared in the `t5` module.

mod local;

use crate::common::error::TranslateError;
pub use local::LocalResource;
use std::path::PathBuf;

/// # Resource Trait that can provide the location of the model, configuration or vocabulary resources
pub trait ResourceProvider {
    /// Provides the local path for a resource.
    ///
    /// # Returns
    ///
    /// * `PathBuf` pointing to the resource file
    ///
    /// # Example
    ///
    /// ```no_run
    /// use t5_translate::resources::{LocalResource, ResourceProvider};
    /// use std::path::PathBuf;
    /// let config_resource = LocalResource {
    ///     local_path: PathBuf::from("path/to/config.json"),
    /// };
    /// let config_path = config_resource.get_local_path();
    /// ```
    fn get_local_path(&self) -> Result<PathBuf, TranslateError>;
}

impl<T: ResourceProvider + ?Sized> ResourceProvider for Box<T> {
    fn get_local_path(&self) -> Result<PathBuf, TranslateError> {
        T::get_local_path(self)
    }
}

#[cfg(feature = "remote")]
mod remote;
#[cfg(feature = "remote")]
pub use remote::RemoteResource;
