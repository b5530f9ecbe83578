pub mod view;

pub use view::{NewPropertyView, PropertyView, PropertyViewCount, RecordViewRequest};
