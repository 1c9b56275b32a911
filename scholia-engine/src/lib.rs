pub mod collaborators;
pub mod command;
pub mod find;
pub mod mount;
pub mod mutation;
pub mod navigation;
pub mod notification;
pub mod resolver;
pub mod selection;
pub mod session;

pub mod errors {
    use scholia_core::document::EntityId;
    use scholia_core::graph::GraphError;
    use thiserror::Error;

    use crate::mount::MountError;

    #[derive(Debug, Error)]
    pub enum EngineError {
        #[error("entity with id {0} not found")]
        EntityNotFound(EntityId),
        #[error("entity {0} has no bounding boxes")]
        EntityHasNoBoxes(EntityId),
        #[error("page {0} has no viewport from the viewer")]
        PageNotRendered(u32),
        #[error("match index {index} out of range (matches: {len})")]
        MatchIndexOutOfRange { index: usize, len: usize },
        #[error(transparent)]
        Graph(#[from] GraphError),
        #[error(transparent)]
        Mount(#[from] MountError),
    }
}

#[cfg(test)]
pub(crate) mod testing;
