pub mod media_association;
pub mod media_record;
