// This module describes the fixed runtime surface that generated code depends on. Lowered
// programs never format numbers or talk to the operating system themselves: printing an
// integer calls an itoa-style conversion into a caller-provided stack buffer, and every
// byte of output goes through one write primitive parameterised by file descriptor,
// pointer, and length. The symbol names and signatures below are what lowering declares
// in each module that prints; the interpreter implements both natively with the helpers
// here, and a native toolchain links a small C or Rust object exporting the same symbols.

//! Runtime symbols shared by lowering and execution.

use crate::ir::IrType;

/// `i64 xi_itoa(i64 value, ptr buf)`: writes the decimal text of `value` at
/// `buf` and returns its length.
pub const ITOA_SYMBOL: &str = "xi_itoa";
pub const ITOA_PARAMS: [IrType; 2] = [IrType::I64, IrType::Ptr];
pub const ITOA_RET: IrType = IrType::I64;

/// `i64 xi_write(i64 fd, ptr bytes, i64 len)`: writes `len` bytes to `fd`.
pub const WRITE_SYMBOL: &str = "xi_write";
pub const WRITE_PARAMS: [IrType; 3] = [IrType::I64, IrType::Ptr, IrType::I64];
pub const WRITE_RET: IrType = IrType::I64;

/// Buffer size that holds any `i64` in decimal, sign included.
pub const ITOA_BUFFER_LEN: u32 = 21;

/// Write the decimal text of `value` at the start of `buf`, returning the
/// number of bytes written. Output is cut short if `buf` is too small.
pub fn itoa(value: i64, buf: &mut [u8]) -> usize {
    let mut digits = [0u8; ITOA_BUFFER_LEN as usize];
    let mut pos = digits.len();

    // unsigned_abs keeps i64::MIN representable
    let mut magnitude = value.unsigned_abs();
    loop {
        pos -= 1;
        digits[pos] = b'0' + (magnitude % 10) as u8;
        magnitude /= 10;
        if magnitude == 0 {
            break;
        }
    }
    if value < 0 {
        pos -= 1;
        digits[pos] = b'-';
    }

    let text = &digits[pos..];
    let len = text.len().min(buf.len());
    buf[..len].copy_from_slice(&text[..len]);
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(value: i64) -> String {
        let mut buf = [0u8; ITOA_BUFFER_LEN as usize];
        let len = itoa(value, &mut buf);
        String::from_utf8(buf[..len].to_vec()).unwrap()
    }

    #[test]
    fn test_itoa() {
        assert_eq!(render(0), "0");
        assert_eq!(render(7), "7");
        assert_eq!(render(-42), "-42");
        assert_eq!(render(1234567890), "1234567890");
        assert_eq!(render(i64::MAX), "9223372036854775807");
        assert_eq!(render(i64::MIN), "-9223372036854775808");
    }

    #[test]
    fn test_itoa_short_buffer() {
        let mut buf = [0u8; 2];
        assert_eq!(itoa(12345, &mut buf), 2);
        assert_eq!(&buf, b"12");
    }
}
