pub mod catalog;
pub mod source;

pub use catalog::PricingCatalog;
pub use source::load_catalog;
