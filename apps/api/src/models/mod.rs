pub mod analysis;
pub mod record;
