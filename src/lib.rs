pub mod analyze;
pub mod cache;
pub mod config;
pub mod extract;
pub mod gateway;
pub mod generator;
pub mod project;
pub mod template;
pub mod validate;

pub use cache::ResponseCache;
pub use config::GeneratorConfig;
pub use gateway::{GatewayError, ModelGateway, TextGenerator};
pub use generator::ProjectGenerator;
pub use project::{FileSpec, ProjectStructure};
pub use validate::{ProjectValidator, ValidationReport};
