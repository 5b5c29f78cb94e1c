pub mod models;
pub mod ldap_client;
pub mod classifier;
pub mod collector;
pub mod report_data;
pub mod html_generator;
pub mod shell;
pub mod windows_auth;
pub mod diagnostics;
