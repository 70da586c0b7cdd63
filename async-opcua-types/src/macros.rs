/// Ergonomic type-based dispatch over an [`crate::extension_object::ExtensionObject`]'s body.
///
/// ```ignore
/// match_extension_object_owned!(obj,
///     v: DataChangeNotification => handle_data_change(v),
///     v: EventNotificationList => handle_event(v),
///     _ => { tracing::debug!("ignoring notification of type {:?}", obj.binary_type_id()) }
/// )
/// ```
///
/// Tries each typed arm in turn via `inner_is`/`decode_inner`; falls through
/// to the trailing `_` arm if no type matches, or if decoding a matching
/// type fails.
#[macro_export]
macro_rules! match_extension_object_owned {
    ($obj:expr, $($pat:ident : $ty:ty => $body:expr),+ , _ => $default:expr $(,)?) => {{
        let ctx = $crate::context::Context::none();
        $(
            if $obj.inner_is::<$ty>() {
                match $obj.decode_inner::<$ty>(&ctx) {
                    Ok($pat) => $body,
                    Err(_) => $default,
                }
            } else
        )+
        {
            $default
        }
    }};
}
