// Application layer - Use case interactors

pub mod batch_interactor;
pub mod container;
pub mod export_interactor;
pub mod inspect_interactor;

// Re-export interactors
pub use batch_interactor::{BatchConvertInteractor, BatchOutcome};
pub use container::{AppContainer, DefaultAppContainer};
pub use export_interactor::{
    ExportInteractor, ExportLock, ExportRequest, ExportResponse, ExportState, ExportToken,
};
pub use inspect_interactor::{InspectInteractor, KeyframeLookup};
