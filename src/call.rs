//! Dynamic call dispatch.
//!
//! `eval` ships a function *name*; the executing peer resolves it through a
//! process-wide registry collected at link time. [`register_function!`]
//! declares the function and its registry entry in one place, so the name
//! and the typed signature cannot drift apart. The [`eval!`](crate::eval!)
//! macro closes the loop on the caller side: it type-checks the argument
//! list against the actual function item at compile time.
//!
//! A signature mismatch observed at dispatch therefore means the message
//! itself was corrupted in a way that still framed. That is a fatal
//! protocol error and aborts the process.

use std::collections::HashMap;

use linkme::distributed_slice;
use once_cell::sync::Lazy;

use crate::tuple::Tuple;
use crate::value::{FnCall, FromValue, Value};

/// One registered function: its public name and a monomorphized adapter
/// binding a [`Tuple`] of arguments to the typed parameter list.
pub struct FnRegistration {
    pub name: &'static str,
    pub invoke: fn(&Tuple) -> Value,
}

/// Link-time collection of every [`register_function!`] use in the program.
#[distributed_slice]
pub static REGISTERED_FUNCTIONS: [FnRegistration];

static FUNCTIONS_BY_NAME: Lazy<HashMap<&'static str, &'static FnRegistration>> =
    Lazy::new(|| {
        let mut map = HashMap::with_capacity(REGISTERED_FUNCTIONS.len());
        for registration in REGISTERED_FUNCTIONS.static_slice() {
            if map.insert(registration.name, registration).is_some() {
                log::warn!(
                    "duplicate dynamic function registration for `{}`; keeping the last",
                    registration.name
                );
            }
        }
        map
    });

/// Look up a registered function by name.
pub fn lookup(name: &str) -> Option<&'static FnRegistration> {
    FUNCTIONS_BY_NAME.get(name).copied()
}

impl FnCall {
    /// Resolve the function name and invoke it on the held arguments.
    ///
    /// # Panics
    /// On an unregistered name or a signature mismatch; both indicate
    /// protocol corruption, which is fatal by design.
    pub fn execute(&self) -> Value {
        let Some(registration) = lookup(self.name()) else {
            panic!("dynamic call to unregistered function `{}`", self.name());
        };
        (registration.invoke)(self.args())
    }
}

////////////////////////////////////////////////////////////////////////////////
// adapter plumbing used by register_function!
////////////////////////////////////////////////////////////////////////////////

#[doc(hidden)]
#[track_caller]
pub fn expect_arg<T: FromValue>(args: &Tuple, position: usize, fn_name: &str) -> T {
    let Some(value) = args.field(position) else {
        panic!("dynamic call `{fn_name}`: argument tuple ended at position {position}");
    };
    match T::from_value(value) {
        Some(arg) => arg,
        None => panic!(
            "dynamic call `{fn_name}`: argument {position} has kind {}, signature expects {}",
            value.kind(),
            T::KIND,
        ),
    }
}

#[doc(hidden)]
#[track_caller]
pub fn check_arity(args: &Tuple, expected: usize, fn_name: &str) {
    if args.len() != expected {
        panic!(
            "dynamic call `{fn_name}`: got {} argument(s), signature expects {expected}",
            args.len(),
        );
    }
}

/// Declares a function and registers it for dynamic dispatch under its own
/// name.
///
/// ```
/// linda::register_function! {
///     fn double(x: i64) -> i64 {
///         x * 2
///     }
/// }
///
/// let result = linda::call::lookup("double").unwrap();
/// # use linda::tuple;
/// assert_eq!((result.invoke)(&tuple!(21i64)), linda::value::Value::from(42i64));
/// ```
#[macro_export]
macro_rules! register_function {
    (
        $(#[$meta:meta])*
        $vis:vis fn $name:ident ( $($param:ident : $ty:ty),* $(,)? ) -> $ret:ty
        $body:block
    ) => {
        $(#[$meta])*
        $vis fn $name($($param: $ty),*) -> $ret $body

        const _: () = {
            #[$crate::linkme::distributed_slice($crate::call::REGISTERED_FUNCTIONS)]
            #[linkme(crate = $crate::linkme)]
            static REGISTRATION: $crate::call::FnRegistration =
                $crate::call::FnRegistration {
                    name: stringify!($name),
                    invoke: |args| {
                        #[allow(unused_mut)]
                        let mut position = 0usize;
                        $(
                            let $param: $ty =
                                $crate::call::expect_arg::<$ty>(args, position, stringify!($name));
                            position += 1;
                        )*
                        $crate::call::check_arity(args, position, stringify!($name));
                        $crate::value::Value::from($name($($param),*))
                    },
                };
        };
    };
}

/// Builds the call tuple for [`Runtime::eval`](crate::runtime::Runtime::eval)
/// and dispatches it: the result key, then the function item applied to its
/// arguments. Referencing the function item pins the registered name and
/// type-checks the argument list at compile time.
///
/// ```no_run
/// # linda::register_function! { fn str_size(s: String) -> i64 { s.len() as i64 } }
/// # fn demo(rt: &linda::runtime::Runtime) -> linda::error::Result<()> {
/// linda::eval!(rt, "str_size", str_size(String::from("test")))?;
/// # Ok(())
/// # }
/// ```
#[macro_export]
macro_rules! eval {
    ($rt:expr, $key:expr, $f:ident ( $($arg:expr),* $(,)? )) => {{
        // never called: pins the registered name to a real function item and
        // type-checks the argument list against its signature
        let signature_check = || $f($(($arg).clone()),*);
        let _ = &signature_check;
        $rt.eval($crate::tuple::Tuple::from_values([
            $crate::value::Value::from($key),
            $crate::value::Value::from($crate::value::FnCall::new(
                stringify!($f),
                $crate::tuple::Tuple::from_values([
                    $($crate::value::Value::from($arg)),*
                ]),
            )),
        ]))
    }};
}
