//! Register value codecs: byte order, typed converters and scale laws

pub mod byte_order;
pub mod converter;
pub mod scale;

pub use byte_order::ByteOrder;
pub use converter::{ConverterCache, TagValue, TypeConverter, ValueType};
pub use scale::{LinearScale, ScaleLaw};
