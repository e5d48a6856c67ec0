//! Tag and group model

pub mod group;
pub mod table;
pub mod tag;

pub use group::{Group, GroupDef, GroupId};
pub use table::{TagTable, TagTableBuilder};
pub use tag::{
    Access, Quality, Region, Tag, TagDef, TagId, TagInfo, TagMeta, TagSnapshot, TagState,
    REGION_ADDRESS_SPACE,
};
