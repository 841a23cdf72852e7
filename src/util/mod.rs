//! Small helpers shared by every module: `tracing` target paths and TLS configuration.

/// `module::function` of the enclosing `#[named]` function, for use as a `tracing` target.
#[macro_export]
macro_rules! function_path {
    () => (concat!(module_path!(), "::", function_name!()))
}

/// `module::Type::method` of the enclosing `#[named]` method.
#[macro_export]
macro_rules! method_path {
    ($type_name: literal) => (concat!(module_path!(), "::", $type_name, "::", function_name!()))
}

pub mod rustls;

pub use function_name::named;
