pub mod create;
pub mod destroy_all;
pub mod destroy_vm;
pub mod info;
pub mod list_resources;
pub mod recreate;
