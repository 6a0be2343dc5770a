// Nominal types are resolved here, at lowering time, not in the parser: the parser accepts
// any identifier in type position and an unknown name only becomes an error once lowering
// needs the machine type. The table is closed.

//! Mapping from source type names to IR types.

use crate::ast::Type;
use crate::error::{LowerError, LowerResult};
use crate::ir::IrType;

/// Resolve a source type name.
///
/// | name          | IR type  |
/// |---------------|----------|
/// | `int`, `uint` | `i64`    |
/// | `float`       | `double` |
/// | `char`        | `i8`     |
/// | `bool`        | `i1`     |
/// | `str`         | `ptr`    |
/// | `nil`         | `void`   |
pub fn resolve_name(name: &str) -> LowerResult<IrType> {
    match name {
        "int" | "uint" => Ok(IrType::I64),
        "float" => Ok(IrType::F64),
        "char" => Ok(IrType::I8),
        "bool" => Ok(IrType::I1),
        "str" => Ok(IrType::Ptr),
        "nil" => Ok(IrType::Void),
        other => Err(LowerError::UnknownType {
            name: other.to_string(),
        }),
    }
}

pub fn resolve_type(ty: &Type<'_>) -> LowerResult<IrType> {
    resolve_name(ty.name())
}

/// Source spelling of an IR type, for error messages.
pub fn source_name(ty: IrType) -> &'static str {
    match ty {
        IrType::I1 => "bool",
        IrType::I8 => "char",
        IrType::I64 => "int",
        IrType::F64 => "float",
        IrType::Ptr => "str",
        IrType::Void => "nil",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_table() {
        assert_eq!(resolve_name("int").unwrap(), IrType::I64);
        assert_eq!(resolve_name("uint").unwrap(), IrType::I64);
        assert_eq!(resolve_name("char").unwrap(), IrType::I8);
        assert_eq!(resolve_type(&Type::Symbol("bool")).unwrap(), IrType::I1);
        assert_eq!(resolve_name("nil").unwrap(), IrType::Void);
        assert_eq!(
            resolve_name("Point").unwrap_err(),
            LowerError::UnknownType {
                name: "Point".to_string()
            }
        );
        assert_eq!(source_name(IrType::Ptr), "str");
    }
}
