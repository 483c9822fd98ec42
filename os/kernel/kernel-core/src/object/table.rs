/// Generates the closed set of object kinds.
///
/// One line per kind yields the [`ObjectKind`] tag, the [`Reclaim`] and
/// [`ObjectRef`] unions and the sealed `KernelObject` impls. Cleanup dispatch
/// matches on `Reclaim`, so a new kind must also get a cleanup arm.
macro_rules! object_table {
    ($($kind:ident => $ty:ty),+ $(,)?) => {
        /// Type tag stored in every [`ObjectHeader`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub enum ObjectKind {
            $($kind),+
        }

        impl ObjectKind {
            pub const ALL: &'static [Self] = &[$(Self::$kind),+];

            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$kind => stringify!($kind)),+
                }
            }
        }

        impl ::core::fmt::Display for ObjectKind {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                f.write_str(self.name())
            }
        }

        /// An object whose last reference is gone, waiting for its cleanup DPC.
        ///
        /// Holds the cell alive; the body drops once cleanup is done with it.
        pub enum Reclaim {
            $($kind(::alloc::sync::Arc<ObjectCell<$ty>>)),+
        }

        impl Reclaim {
            #[must_use]
            pub fn header(&self) -> &ObjectHeader {
                match self {
                    $(Self::$kind(cell) => cell.header()),+
                }
            }

            #[must_use]
            pub fn kind(&self) -> ObjectKind {
                self.header().kind()
            }
        }

        impl ::core::fmt::Debug for Reclaim {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "Reclaim({}#{})", self.kind(), self.header().id())
            }
        }

        /// A strong reference to an object of any kind.
        pub enum ObjectRef {
            $($kind(Ref<$ty>)),+
        }

        impl ObjectRef {
            #[must_use]
            pub const fn kind(&self) -> ObjectKind {
                match self {
                    $(Self::$kind(_) => ObjectKind::$kind),+
                }
            }

            #[must_use]
            pub fn header(&self) -> &ObjectHeader {
                match self {
                    $(Self::$kind(r) => r.header()),+
                }
            }

            #[must_use]
            pub fn id(&self) -> ObjectId {
                self.header().id()
            }

            #[must_use]
            pub fn holder(&self) -> Holder {
                match self {
                    $(Self::$kind(r) => r.holder()),+
                }
            }

            /// Adds a reference owned by `holder`.
            #[must_use]
            pub fn clone_as(&self, holder: Holder) -> Self {
                match self {
                    $(Self::$kind(r) => Self::$kind(r.clone_as(holder))),+
                }
            }

            /// Recovers the typed handle, or hands the reference back.
            ///
            /// # Errors
            /// The original reference when it is of another kind.
            pub fn downcast<T: KernelObject>(self) -> Result<Ref<T>, Self> {
                T::from_object_ref(self)
            }

            #[must_use]
            pub fn as_ref<T: KernelObject>(&self) -> Option<&Ref<T>> {
                T::as_typed(self)
            }
        }

        impl ::core::fmt::Debug for ObjectRef {
            fn fmt(&self, f: &mut ::core::fmt::Formatter<'_>) -> ::core::fmt::Result {
                write!(f, "{}#{}", self.kind(), self.id())
            }
        }

        /// Implemented by every object body; sealed to the kinds above.
        pub trait KernelObject: Sized + Send + Sync + 'static + sealed::Sealed {
            const KIND: ObjectKind;

            #[doc(hidden)]
            fn reclaim(cell: ::alloc::sync::Arc<ObjectCell<Self>>) -> Reclaim;

            fn into_object_ref(r: Ref<Self>) -> ObjectRef;

            /// # Errors
            /// The original reference when it is of another kind.
            fn from_object_ref(r: ObjectRef) -> Result<Ref<Self>, ObjectRef>;

            fn as_typed(r: &ObjectRef) -> Option<&Ref<Self>>;
        }

        $(
            impl sealed::Sealed for $ty {}

            impl KernelObject for $ty {
                const KIND: ObjectKind = ObjectKind::$kind;

                fn reclaim(cell: ::alloc::sync::Arc<ObjectCell<Self>>) -> Reclaim {
                    Reclaim::$kind(cell)
                }

                fn into_object_ref(r: Ref<Self>) -> ObjectRef {
                    ObjectRef::$kind(r)
                }

                fn from_object_ref(r: ObjectRef) -> Result<Ref<Self>, ObjectRef> {
                    match r {
                        ObjectRef::$kind(r) => Ok(r),
                        other => Err(other),
                    }
                }

                fn as_typed(r: &ObjectRef) -> Option<&Ref<Self>> {
                    match r {
                        ObjectRef::$kind(r) => Some(r),
                        _ => None,
                    }
                }
            }

            impl From<Ref<$ty>> for ObjectRef {
                fn from(r: Ref<$ty>) -> Self {
                    Self::$kind(r)
                }
            }
        )+
    };
}
