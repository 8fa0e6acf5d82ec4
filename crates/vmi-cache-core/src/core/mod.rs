pub(crate) mod macros;
mod protection;
mod value;

pub use self::{
    protection::Protection,
    value::{Gfn, MappingHandle},
};
