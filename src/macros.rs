/// A trace [`Frame`](crate::protocol::Frame) for the current source location.
#[macro_export]
macro_rules! frame {
    ($function:expr) => {
        $crate::protocol::Frame::new($function, file!(), line!())
    };
}
