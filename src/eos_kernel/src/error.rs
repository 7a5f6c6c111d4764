//! Result codes and per-operation error types
use core::fmt;

/// The macro to define [`ResultCode`].
macro_rules! define_result_code {
    (
        $( #[$meta:meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident = $vd:expr
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        pub enum ResultCode {
            $(
                $( #[$vmeta] )*
                $vname = $vd
            ),*
        }

        impl ResultCode {
            /// Get the short name of the result code.
            ///
            /// # Examples
            ///
            /// ```
            /// use eos_kernel::ResultCode;
            /// assert_eq!(ResultCode::QueueOverflow.as_str(), "QueueOverflow");
            /// ```
            pub fn as_str(self) -> &'static str {
                match self {
                    $(
                        Self::$vname => stringify!($vname),
                    )*
                }
            }

            fn fmt(self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl fmt::Debug for ResultCode {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                (*self).fmt(f)
            }
        }
    };
}

define_result_code! {
    /// All result codes (including success) that a kernel operation can
    /// report.
    ///
    /// The error codes are matched to their closest equivalents in μITRON4.0.
    #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
    #[repr(i8)]
    pub enum ResultCode {
        /// The operation was successful.
        Success = 0,
        /// The calling task was parked and must repeat the call once it is
        /// dispatched again.
        Blocked = -1,
        /// The caller does not own the resource.
        NotOwner = -29,
        /// Resource deadlock would occur.
        WouldDeadlock = -30,
        /// The heap backing the object is exhausted.
        NoMemory = -33,
        /// The object table or the id space is exhausted, or the named object
        /// does not exist.
        NoId = -34,
        /// A fixed-capacity pool or buffer has no room for the request.
        QueueOverflow = -43,
        /// The operation timed out.
        Timeout = -50,
    }
}

impl ResultCode {
    /// Get a flag indicating whether the code represents a failure.
    ///
    /// Failure codes have negative values.
    #[inline]
    pub fn is_err(self) -> bool {
        (self as i8) < 0
    }

    /// Get a flag indicating whether the code represents a success.
    #[inline]
    pub fn is_ok(self) -> bool {
        !self.is_err()
    }
}

macro_rules! define_error {
    (
        mod $mod_name:ident {}
        $( #[$meta:meta] )*
        $vis:vis enum $name:ident {
            $(
                $( #[$vmeta:meta] )*
                $vname:ident
            ),* $(,)*
        }
    ) => {
        $( #[$meta] )*
        ///
        /// See [`ResultCode`] for all result codes and generic descriptions.
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[repr(i8)]
        $vis enum $name {
            $(
                $( #[$vmeta] )*
                $vname = ResultCode::$vname as i8
            ),*
        }

        impl fmt::Debug for $name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        impl From<Result<(), $name>> for ResultCode {
            #[inline]
            fn from(x: Result<(), $name>) -> Self {
                match x {
                    Ok(()) => Self::Success,
                    Err(e) => Self::from(e),
                }
            }
        }

        impl From<$name> for ResultCode {
            #[inline]
            fn from(x: $name) -> Self {
                match x {
                    $( $name::$vname => Self::$vname ),*
                }
            }
        }

        #[cfg(test)]
        mod $mod_name {
            use super::*;

            #[test]
            fn to_result_code() {
                $(
                    assert_eq!(
                        ResultCode::$vname as i8,
                        $name::$vname as i8,
                    );
                    assert_eq!(
                        ResultCode::$vname,
                        ResultCode::from($name::$vname),
                    );
                )*
                assert_eq!(
                    ResultCode::Success,
                    ResultCode::from(Result::<(), $name>::Ok(())),
                );
            }
        }
    };
}

define_error! {
    mod wait_event_error {}
    /// Error type for [`Kernel::wait_event`](crate::Kernel::wait_event).
    pub enum WaitEventError {
        /// No event arrived before the deadline.
        Timeout,
        /// The caller was parked.
        Blocked,
    }
}

define_error! {
    mod wait_specific_event_error {}
    /// Error type for
    /// [`Kernel::wait_specific_event`](crate::Kernel::wait_specific_event).
    pub enum WaitSpecificEventError {
        /// The topic could not be created in the registry.
        NoId,
        Timeout,
        Blocked,
    }
}

define_error! {
    mod give_error {}
    /// Error type for event delivery (`send`, `publish`).
    pub enum GiveError {
        /// The event could not be created in the registry.
        NoId,
        /// The event record pool is full.
        QueueOverflow,
        /// Another task is producing the same event. The caller was parked.
        Blocked,
    }
}

define_error! {
    mod subscribe_error {}
    /// Error type for [`Kernel::subscribe`](crate::Kernel::subscribe).
    pub enum SubscribeError {
        NoId,
    }
}

define_error! {
    mod create_event_error {}
    /// Error type for the operations that create an event on first use, such
    /// as [`Kernel::event_attribute_global`](crate::Kernel::event_attribute_global).
    pub enum CreateEventError {
        /// The registry is full.
        NoId,
    }
}

define_error! {
    mod mutex_take_error {}
    /// Error type for [`Kernel::mutex_take`](crate::Kernel::mutex_take).
    pub enum MutexTakeError {
        NoId,
        /// The caller already owns the mutex.
        WouldDeadlock,
        Blocked,
    }
}

define_error! {
    mod mutex_release_error {}
    /// Error type for [`Kernel::mutex_release`](crate::Kernel::mutex_release).
    pub enum MutexReleaseError {
        NotOwner,
    }
}

define_error! {
    mod timer_start_error {}
    /// Error type for [`Kernel::timer_start`](crate::Kernel::timer_start).
    pub enum TimerStartError {
        NoId,
        /// The timer pool is full.
        QueueOverflow,
    }
}

define_error! {
    mod time_event_error {}
    /// Error type for arming a time event.
    pub enum TimeEventError {
        NoId,
        /// The time event pool is full.
        QueueOverflow,
    }
}

define_error! {
    mod db_register_error {}
    /// Error type for [`Kernel::db_register`](crate::Kernel::db_register).
    pub enum DbRegisterError {
        NoId,
        /// The db heap cannot hold the value or stream buffer.
        NoMemory,
    }
}

define_error! {
    mod db_write_error {}
    /// Error type for the db write operations.
    pub enum DbWriteError {
        Blocked,
        /// The stream lacks room for the data.
        QueueOverflow,
        /// The linked event could not be published.
        NoId,
    }
}

define_error! {
    mod db_read_error {}
    /// Error type for the db read operations.
    pub enum DbReadError {
        Blocked,
    }
}

define_error! {
    mod task_start_error {}
    /// Error type for [`Kernel::task_start`](crate::Kernel::task_start).
    pub enum TaskStartError {
        /// The task id space or the registry is exhausted.
        NoId,
    }
}

macro_rules! define_suberror {
    (
        $( #[doc $( $doc:tt )*] )*
        $( #[into( $Supererror:path )] )*
        $vis:vis enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        $( #[doc $( $doc )*] )*
        #[repr(i8)]
        #[derive(PartialEq, Eq, Copy, Clone)]
        $vis enum $Name {
            $( $Variant = ResultCode::$Variant as _ ),*
        }

        impl fmt::Debug for $Name {
            #[inline]
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                ResultCode::from(*self).fmt(f)
            }
        }

        define_suberror! {
            @into
            #[into(ResultCode)]
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    (
        @into
        #[into( $Supererror0:path )]
        $( #[into( $Supererror:path )] )*
        enum $Name:ident {
            $( $Variant:ident, )*
        }
    ) => {
        impl From<$Name> for $Supererror0 {
            #[inline]
            fn from(x: $Name) -> Self {
                match x {
                    $( $Name::$Variant => Self::$Variant ),*
                }
            }
        }

        define_suberror! {
            @into
            $( #[into( $Supererror )] )*
            enum $Name {
                $( $Variant, )*
            }
        }
    };

    ( @into enum $($_:tt)* ) => {};
}

define_suberror! {
    /// `NoId`
    #[into(WaitSpecificEventError)]
    #[into(GiveError)]
    #[into(SubscribeError)]
    #[into(CreateEventError)]
    #[into(MutexTakeError)]
    #[into(TimerStartError)]
    #[into(TimeEventError)]
    #[into(DbRegisterError)]
    #[into(DbWriteError)]
    #[into(TaskStartError)]
    pub(crate) enum NoIdError {
        NoId,
    }
}

define_suberror! {
    /// `Blocked`
    #[into(WaitEventError)]
    #[into(WaitSpecificEventError)]
    #[into(GiveError)]
    #[into(MutexTakeError)]
    #[into(DbWriteError)]
    #[into(DbReadError)]
    pub(crate) enum BlockedError {
        Blocked,
    }
}

define_suberror! {
    /// `QueueOverflow`
    #[into(GiveError)]
    #[into(TimerStartError)]
    #[into(TimeEventError)]
    #[into(DbWriteError)]
    pub(crate) enum QueueOverflowError {
        QueueOverflow,
    }
}

impl From<WaitEventError> for WaitSpecificEventError {
    #[inline]
    fn from(x: WaitEventError) -> Self {
        match x {
            WaitEventError::Timeout => Self::Timeout,
            WaitEventError::Blocked => Self::Blocked,
        }
    }
}

impl From<GiveError> for DbWriteError {
    #[inline]
    fn from(x: GiveError) -> Self {
        match x {
            GiveError::NoId => Self::NoId,
            GiveError::QueueOverflow => Self::QueueOverflow,
            GiveError::Blocked => Self::Blocked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suberror_into() {
        assert_eq!(GiveError::from(NoIdError::NoId), GiveError::NoId);
        assert_eq!(
            DbWriteError::from(QueueOverflowError::QueueOverflow),
            DbWriteError::QueueOverflow
        );
        assert_eq!(
            ResultCode::from(BlockedError::Blocked),
            ResultCode::Blocked
        );
    }

    #[test]
    fn debug_prints_the_code_name() {
        assert_eq!(format!("{:?}", MutexTakeError::WouldDeadlock), "WouldDeadlock");
        assert!(ResultCode::Timeout.is_err());
        assert!(ResultCode::Success.is_ok());
    }
}
