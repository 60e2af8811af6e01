use log::debug;

use crate::{process, Result};

/// Read access to the pushed repository.
pub trait Repository {
    /// Whether `revision` has a `Dockerfile` at the root of its tree.
    fn has_dockerfile(&self, revision: &str) -> Result<bool>;
}

/// The repository git runs the hook in, which is the working directory.
#[derive(Debug, Default)]
pub struct GitRepository;

impl Repository for GitRepository {
    fn has_dockerfile(&self, revision: &str) -> Result<bool> {
        let found = process::command!("git", "cat-file", "-e", format!("{revision}:Dockerfile"))
            .try_status()?
            .success();
        debug!("Dockerfile in {revision}: {found}");
        Ok(found)
    }
}
