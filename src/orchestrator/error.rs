use crate::handles::StoreError;
use crate::live::LiveError;

#[derive(thiserror::Error, Debug)]
pub enum OrchestratorError {
    #[error(transparent)]
    Live(#[from] LiveError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
