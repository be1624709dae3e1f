/// Server error codes the proxy raises on its own behalf.
#[allow(non_camel_case_types)]
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[repr(u16)]
pub enum ErrorKind {
    ER_ACCESS_DENIED_ERROR = 1045,
}

impl ErrorKind {
    pub fn sqlstate(&self) -> &'static [u8] {
        match self {
            ErrorKind::ER_ACCESS_DENIED_ERROR => b"28000",
        }
    }
}
