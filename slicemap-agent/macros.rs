//! Declarative macros for the closed enums of the agent

/// Enum of exported metric families, each with its name and help text
///
/// # Example
/// ```
/// use slicemap::metric_enum;
///
/// metric_enum! {
///     pub enum ProbeMetric {
///         Attempts => ("slicemap_probe_attempts_total", "Probe attempts issued"),
///         Backoffs => ("slicemap_probe_backoffs_total", "Backoff sleeps taken"),
///     }
/// }
///
/// assert_eq!(ProbeMetric::Attempts.name(), "slicemap_probe_attempts_total");
/// assert_eq!(ProbeMetric::Backoffs.help(), "Backoff sleeps taken");
/// assert_eq!(ProbeMetric::all().len(), 2);
/// ```
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => ($metric:literal, $help:literal)),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $metric,)*
                }
            }

            pub fn help(&self) -> &'static str {
                match self {
                    $($name::$variant => $help,)*
                }
            }

            pub fn all() -> &'static [$name] {
                &[$($name::$variant,)*]
            }
        }
    };
}

/// Enum with a display name and one typed datum per variant
///
/// # Example
/// ```
/// use slicemap::enum_with_data;
///
/// enum_with_data! {
///     pub enum Model: u32 {
///         Skx => ("Skylake Xeon", 0x50650),
///         Icx => ("Ice Lake Xeon", 0x606a0),
///     }
///     impl signature -> u32
/// }
///
/// assert_eq!(Model::Icx.name(), "Ice Lake Xeon");
/// assert_eq!(Model::Skx.signature(), 0x50650);
/// assert!(Model::all().contains(&Model::Icx));
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($label:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $label,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> &'static [$name] {
                &[$($name::$variant,)*]
            }
        }
    };
}
