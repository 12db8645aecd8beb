use crate::common::error::TranslateError;
use crate::resources::ResourceProvider;
use std::path::{Path, PathBuf};

/// # Local resource
#[derive(PartialEq, Clone, Debug)]
pub struct LocalResource {
    /// Local path for the resource
    pub local_path: PathBuf,
}

impl LocalResource {
    /// Resolves a file name inside a model directory, e.g. `config.json` in a directory holding
    /// an exported T5 checkpoint.
    pub fn from_model_dir<P: AsRef<Path>>(model_dir: P, file_name: &str) -> LocalResource {
        LocalResource {
            local_path: model_dir.as_ref().join(file_name),
        }
    }
}

impl From<PathBuf> for LocalResource {
    fn from(local_path: PathBuf) -> Self {
        Self { local_path }
    }
}

impl ResourceProvider for LocalResource {
    /// Gets the path for a local resource. Fails if no file exists at that location.
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
    fn get_local_path(&self) -> Result<PathBuf, TranslateError> {
        if !self.local_path.is_file() {
            return Err(TranslateError::IOError(format!(
                "Resource file not found: {}",
                self.local_path.display()
            )));
        }
        Ok(self.local_path.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn resolves_existing_file() -> anyhow::Result<()> {
        let model_dir = tempfile::tempdir()?;
        let mut config_file = std::fs::File::create(model_dir.path().join("config.json"))?;
        writeln!(config_file, "{{}}")?;

        let resource = LocalResource::from_model_dir(model_dir.path(), "config.json");
        assert_eq!(
            resource.get_local_path()?,
            model_dir.path().join("config.json")
        );
        Ok(())
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let resource = LocalResource::from(PathBuf::from("does/not/exist/spiece.model"));
        assert!(matches!(
            resource.get_local_path(),
            Err(TranslateError::IOError(_))
        ));
    }
}
