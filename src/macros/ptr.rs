//! C-style `container_of` pointer recovery for intrusive structures.

/// Cast a pointer to a member of a structure out to the containing structure.
///
/// - `ptr`: the pointer to the member.
/// - `ty`: the type of the container struct this is embedded in.
/// - `field`: the name of the member within the struct.
///
/// The result is a `*mut` pointer to the container. The caller must guarantee
/// that `ptr` really points at the `field` member of a live `ty` object, so
/// the macro can only be used inside an `unsafe` block.
#[macro_export]
macro_rules! container_of_mut {
    ($ptr:expr, $ty:path, $field:tt) => {
        $ptr.cast::<u8>()
            .sub(::core::mem::offset_of!($ty, $field))
            .cast::<$ty>()
    };
}
