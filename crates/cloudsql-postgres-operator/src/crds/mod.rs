pub mod postgresql_instance;
