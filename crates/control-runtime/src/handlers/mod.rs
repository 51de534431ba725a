//! Consumer handlers maintaining the derived read-models.

pub mod crm;
pub mod ops_intel;
pub mod portfolio;

pub use crm::CrmHandler;
pub use ops_intel::OpsIntelHandler;
pub use portfolio::PortfolioHandler;
