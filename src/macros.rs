// this should come before any `mod` that uses it; macro scoping in Rust is textual.

/// Define an enum that can additionally represent any integer value not enumerated, as
/// the `Unknown` variant. Used throughout `wire` for fields (protocol numbers, ARP
/// opcodes, ...) whose valid range is much smaller than the representable range.
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $( $variant:ident = $value:expr ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $( $variant ),*,
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

/// Trace-level logging, compiled away entirely in release builds that disable
/// the `log` max-level feature. Used around packet drops and ARP table churn.
macro_rules! net_trace {
    ($($arg:tt)*) => { log::trace!($($arg)*) }
}

macro_rules! net_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) }
}

pub(crate) use enum_with_unknown;
pub(crate) use net_debug;
pub(crate) use net_trace;
