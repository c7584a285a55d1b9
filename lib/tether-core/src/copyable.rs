//!
//! CopyableData Validation
//!
//! Decides whether a value may cross the dispatch boundary. The compiler
//! already guarantees `Send + 'static` for everything the dispatcher
//! moves; this module adds the stricter plain-data discipline on top:
//! a qualifying argument copies into a fully independent instance with
//! no shared mutable backing storage.
//!
//! Each type reports its layout through [`Describe`] as a [`TypeShape`].
//! Validation walks the shape and rejects the first leaf that is a
//! shared reference, a heap-backed collection, a closure, or a live
//! resource handle. Audited wrappers such as [`Flag`] and
//! `CancelToken` are accepted as opaque leaves.
//!
//! ## Arity
//!
//! Dispatch calls take their arguments as a tuple of zero to four
//! elements ([`DispatchArgs`]). Anything larger goes into one aggregate
//! struct described with [`describe_aggregate!`].
//!
//! ```rust,ignore
//! struct Point { x: f64, y: f64 }
//! describe_aggregate!(Point { x: f64, y: f64 });
//!
//! <(Point, u32)>::validate_all()?;
//! ```
//!

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize};
use std::sync::mpsc::{Receiver, Sender, SyncSender};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

use crate::errors::{RejectReason, ValidationError};

/// Ordinal of an argument within a dispatch call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArgPosition {
    First,
    Second,
    Third,
    Fourth,
}

impl ArgPosition {
    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(ArgPosition::First),
            1 => Some(ArgPosition::Second),
            2 => Some(ArgPosition::Third),
            3 => Some(ArgPosition::Fourth),
            _ => None,
        }
    }

    pub fn index(self) -> usize {
        match self {
            ArgPosition::First => 0,
            ArgPosition::Second => 1,
            ArgPosition::Third => 2,
            ArgPosition::Fourth => 3,
        }
    }
}

impl fmt::Display for ArgPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ordinal = match self {
            ArgPosition::First => "first",
            ArgPosition::Second => "second",
            ArgPosition::Third => "third",
            ArgPosition::Fourth => "fourth",
        };
        write!(f, "{} argument", ordinal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Unit,
    Bool,
    Char,
    Int,
    Uint,
    Float,
    Time,
}

/// Layout summary of a type as seen by the validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeShape {
    Scalar(ScalarKind),
    Array {
        element: Box<TypeShape>,
        len: usize,
    },
    Tuple(Vec<TypeShape>),
    Aggregate {
        name: &'static str,
        fields: Vec<(&'static str, TypeShape)>,
    },
    Option(Box<TypeShape>),
    /// Audited wrapper, accepted without looking inside.
    Sanctioned(&'static str),
    SharedRef(&'static str),
    Collection(&'static str),
    Closure,
    Handle(&'static str),
}

impl TypeShape {
    /// First disallowed leaf, with the field path that reaches it.
    pub fn first_violation(&self) -> Option<(String, RejectReason)> {
        let mut path = String::from("self");
        find_violation(self, &mut path).map(|reason| (path, reason))
    }

    pub fn is_plain_data(&self) -> bool {
        self.first_violation().is_none()
    }
}

fn find_violation(shape: &TypeShape, path: &mut String) -> Option<RejectReason> {
    match shape {
        TypeShape::Scalar(_) | TypeShape::Sanctioned(_) => None,
        TypeShape::SharedRef(name) => Some(RejectReason::SharedReference(name)),
        TypeShape::Collection(name) => Some(RejectReason::Collection(name)),
        TypeShape::Closure => Some(RejectReason::Closure),
        TypeShape::Handle(name) => Some(RejectReason::Handle(name)),
        TypeShape::Array { element, len } => {
            if *len == 0 {
                return None;
            }
            path.push_str("[]");
            let found = find_violation(element, path);
            if found.is_none() {
                path.truncate(path.len() - 2);
            }
            found
        }
        TypeShape::Option(inner) => descend(inner, path, "some"),
        TypeShape::Tuple(elements) => elements.iter().enumerate().find_map(|(i, element)| {
            descend(element, path, &i.to_string())
        }),
        TypeShape::Aggregate { fields, .. } => fields
            .iter()
            .find_map(|(name, field)| descend(field, path, name)),
    }
}

fn descend(shape: &TypeShape, path: &mut String, segment: &str) -> Option<RejectReason> {
    let restore = path.len();
    path.push('.');
    path.push_str(segment);
    let found = find_violation(shape, path);
    if found.is_none() {
        path.truncate(restore);
    }
    found
}

/// Reports the layout of a type to the validator.
pub trait Describe {
    fn shape() -> TypeShape;
}

/// Check a single type as the argument at `position`.
pub fn validate<T: Describe + ?Sized>(position: ArgPosition) -> Result<(), ValidationError> {
    validate_shape(&T::shape(), std::any::type_name::<T>(), position)
}

pub fn validate_shape(
    shape: &TypeShape,
    type_name: &'static str,
    position: ArgPosition,
) -> Result<(), ValidationError> {
    match shape.first_violation() {
        None => Ok(()),
        Some((path, reason)) => Err(ValidationError {
            position,
            type_name,
            path,
            reason,
        }),
    }
}

/// Argument pack accepted by the dispatch calls: a tuple of up to four
/// [`Describe`] values.
pub trait DispatchArgs: Send + 'static {
    const ARITY: usize;

    /// Validate every element in order, stopping at the first rejection.
    fn validate_all() -> Result<(), ValidationError>;
}

impl DispatchArgs for () {
    const ARITY: usize = 0;

    fn validate_all() -> Result<(), ValidationError> {
        Ok(())
    }
}

macro_rules! impl_dispatch_args {
    ($arity:expr; $($name:ident => $position:ident),+) => {
        impl<$($name: Describe + Send + 'static),+> DispatchArgs for ($($name,)+) {
            const ARITY: usize = $arity;

            fn validate_all() -> Result<(), ValidationError> {
                $( validate::<$name>(ArgPosition::$position)?; )+
                Ok(())
            }
        }

        impl<$($name: Describe),+> Describe for ($($name,)+) {
            fn shape() -> TypeShape {
                TypeShape::Tuple(vec![$($name::shape()),+])
            }
        }
    };
}

impl_dispatch_args!(1; A => First);
impl_dispatch_args!(2; A => First, B => Second);
impl_dispatch_args!(3; A => First, B => Second, C => Third);
impl_dispatch_args!(4; A => First, B => Second, C => Third, D => Fourth);

/// Implement [`Describe`] for a plain struct by listing its fields.
///
/// The listed field types are checked against the struct definition at
/// compile time.
#[macro_export]
macro_rules! describe_aggregate {
    ($ty:ident { $($field:ident : $field_ty:ty),* $(,)? }) => {
        impl $crate::Describe for $ty {
            fn shape() -> $crate::TypeShape {
                $crate::TypeShape::Aggregate {
                    name: stringify!($ty),
                    fields: vec![
                        $((stringify!($field), <$field_ty as $crate::Describe>::shape())),*
                    ],
                }
            }
        }

        const _: () = {
            #[allow(dead_code)]
            fn check_fields(value: &$ty) {
                $( let _: &$field_ty = &value.$field; )*
            }
        };
    };
}

/// Audited boolean substitute for flags passed across threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Flag(bool);

impl Flag {
    pub const SET: Flag = Flag(true);
    pub const CLEAR: Flag = Flag(false);

    pub fn is_set(self) -> bool {
        self.0
    }
}

impl From<bool> for Flag {
    fn from(value: bool) -> Self {
        Flag(value)
    }
}

impl From<Flag> for bool {
    fn from(flag: Flag) -> Self {
        flag.0
    }
}

impl Describe for Flag {
    fn shape() -> TypeShape {
        TypeShape::Sanctioned("Flag")
    }
}

macro_rules! describe_scalar {
    ($kind:ident: $($ty:ty),+) => {
        $(
            impl Describe for $ty {
                fn shape() -> TypeShape {
                    TypeShape::Scalar(ScalarKind::$kind)
                }
            }
        )+
    };
}

describe_scalar!(Unit: ());
describe_scalar!(Bool: bool);
describe_scalar!(Char: char);
describe_scalar!(Int: i8, i16, i32, i64, i128, isize);
describe_scalar!(Uint: u8, u16, u32, u64, u128, usize);
describe_scalar!(Float: f32, f64);
describe_scalar!(Time: Duration, Instant, SystemTime);

impl<T: Describe, const N: usize> Describe for [T; N] {
    fn shape() -> TypeShape {
        TypeShape::Array {
            element: Box::new(T::shape()),
            len: N,
        }
    }
}

impl<T: Describe> Describe for Option<T> {
    fn shape() -> TypeShape {
        TypeShape::Option(Box::new(T::shape()))
    }
}

/// Static string literals are immutable for the life of the process.
impl Describe for &'static str {
    fn shape() -> TypeShape {
        TypeShape::Sanctioned("&'static str")
    }
}

/// A box owns its contents outright, so it is as safe as what it holds.
impl<T: Describe + ?Sized> Describe for Box<T> {
    fn shape() -> TypeShape {
        T::shape()
    }
}

impl Describe for str {
    fn shape() -> TypeShape {
        TypeShape::Collection("str")
    }
}

impl<T> Describe for [T] {
    fn shape() -> TypeShape {
        TypeShape::Collection("slice")
    }
}

macro_rules! describe_rejected {
    ($variant:ident($label:expr) => $ty:ty $(, <$($generic:ident),+>)?) => {
        impl$(<$($generic),+>)? Describe for $ty {
            fn shape() -> TypeShape {
                TypeShape::$variant($label)
            }
        }
    };
}

describe_rejected!(Collection("String") => String);
describe_rejected!(Collection("Vec") => Vec<T>, <T>);
describe_rejected!(Collection("VecDeque") => VecDeque<T>, <T>);
describe_rejected!(Collection("HashSet") => HashSet<T>, <T>);
describe_rejected!(Collection("BTreeSet") => BTreeSet<T>, <T>);
describe_rejected!(Collection("HashMap") => HashMap<K, V>, <K, V>);
describe_rejected!(Collection("BTreeMap") => BTreeMap<K, V>, <K, V>);

describe_rejected!(SharedRef("Arc") => Arc<T>, <T>);
describe_rejected!(SharedRef("Rc") => Rc<T>, <T>);
describe_rejected!(SharedRef("Cell") => Cell<T>, <T>);
describe_rejected!(SharedRef("RefCell") => RefCell<T>, <T>);
describe_rejected!(SharedRef("raw pointer") => *const T, <T>);
describe_rejected!(SharedRef("raw pointer") => *mut T, <T>);

describe_rejected!(Handle("Mutex") => Mutex<T>, <T>);
describe_rejected!(Handle("RwLock") => RwLock<T>, <T>);
describe_rejected!(Handle("Condvar") => Condvar);
describe_rejected!(Handle("atomic") => AtomicBool);
describe_rejected!(Handle("atomic") => AtomicI64);
describe_rejected!(Handle("atomic") => AtomicU64);
describe_rejected!(Handle("atomic") => AtomicUsize);
describe_rejected!(Handle("JoinHandle") => JoinHandle<T>, <T>);
describe_rejected!(Handle("Sender") => Sender<T>, <T>);
describe_rejected!(Handle("Sender") => SyncSender<T>, <T>);
describe_rejected!(Handle("Receiver") => Receiver<T>, <T>);
describe_rejected!(Handle("File") => std::fs::File);
describe_rejected!(Handle("TcpStream") => std::net::TcpStream);

impl<T: ?Sized> Describe for &mut T {
    fn shape() -> TypeShape {
        TypeShape::SharedRef("&mut")
    }
}

macro_rules! describe_closure {
    ($($fn_trait:ident),+) => {
        $(
            impl<R> Describe for dyn $fn_trait() -> R {
                fn shape() -> TypeShape {
                    TypeShape::Closure
                }
            }

            impl<R> Describe for dyn $fn_trait() -> R + Send {
                fn shape() -> TypeShape {
                    TypeShape::Closure
                }
            }

            impl<R> Describe for dyn $fn_trait() -> R + Send + Sync {
                fn shape() -> TypeShape {
                    TypeShape::Closure
                }
            }
        )+
    };
}

describe_closure!(Fn, FnMut, FnOnce);
