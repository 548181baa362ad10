//! ## [Data Types](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/1d61ee78-4466-4141-8276-f45153484619)

use super::LtpError;

/// [Property Data Types](https://learn.microsoft.com/en-us/openspecs/exchange_server_protocols/MS-OXCDATA/0c77892e-288e-435a-9c49-be1c20c7afdb)
#[repr(u16)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum PropertyType {
    /// `PtypNull`: None: this property is a placeholder.
    #[default]
    Null = 0x0001,
    /// `PtypInteger16`: 2 bytes; a 16-bit integer.
    Integer16 = 0x0002,
    /// `PtypInteger32`: 4 bytes; a 32-bit integer.
    Integer32 = 0x0003,
    /// `PtypFloating32`: 4 bytes; a 32-bit floating-point number.
    Floating32 = 0x0004,
    /// `PtypFloating64`: 8 bytes; a 64-bit floating-point number.
    Floating64 = 0x0005,
    /// `PtypCurrency`: 8 bytes; a 64-bit signed, scaled integer representation of a decimal
    /// currency value, with four places to the right of the decimal point.
    Currency = 0x0006,
    /// `PtypFloatingTime`: 8 bytes; a 64-bit floating point number in which the whole number part
    /// represents the number of days since December 30, 1899, and the fractional part represents
    /// the fraction of a day since midnight.
    FloatingTime = 0x0007,
    /// `PtypErrorCode`: 4 bytes; a 32-bit integer encoding error information.
    ErrorCode = 0x000A,
    /// `PtypBoolean`: 1 byte, restricted to 1 or 0.
    Boolean = 0x000B,
    /// `PtypObject`: variable size; the property value is a COM object.
    Object = 0x000D,
    /// `PtypInteger64`: 8 bytes; a 64-bit integer.
    Integer64 = 0x0014,
    /// `PtypString8`: variable size; multibyte characters in an externally specified encoding,
    /// null-terminated.
    String8 = 0x001E,
    /// `PtypString`: variable size; UTF-16LE characters, null-terminated.
    Unicode = 0x001F,
    /// `PtypTime`: 8 bytes; 100-nanosecond intervals since January 1, 1601.
    Time = 0x0040,
    /// `PtypGuid`: 16 bytes.
    Guid = 0x0048,
    /// `PtypBinary`: variable size; a COUNT field followed by that many bytes.
    Binary = 0x0102,

    /// `PtypMultipleInteger16`: COUNT field followed by that many [`PropertyType::Integer16`].
    MultipleInteger16 = 0x1002,
    /// `PtypMultipleInteger32`: COUNT field followed by that many [`PropertyType::Integer32`].
    MultipleInteger32 = 0x1003,
    /// `PtypMultipleFloating32`: COUNT field followed by that many [`PropertyType::Floating32`].
    MultipleFloating32 = 0x1004,
    /// `PtypMultipleFloating64`: COUNT field followed by that many [`PropertyType::Floating64`].
    MultipleFloating64 = 0x1005,
    /// `PtypMultipleCurrency`: COUNT field followed by that many [`PropertyType::Currency`].
    MultipleCurrency = 0x1006,
    /// `PtypMultipleFloatingTime`: COUNT field followed by that many [`PropertyType::FloatingTime`].
    MultipleFloatingTime = 0x1007,
    /// `PtypMultipleInteger64`: COUNT field followed by that many [`PropertyType::Integer64`].
    MultipleInteger64 = 0x1014,
    /// `PtypMultipleString8`: COUNT field followed by that many [`PropertyType::String8`].
    MultipleString8 = 0x101E,
    /// `PtypMultipleString`: COUNT field followed by that many [`PropertyType::Unicode`].
    MultipleUnicode = 0x101F,
    /// `PtypMultipleTime`: COUNT field followed by that many [`PropertyType::Time`].
    MultipleTime = 0x1040,
    /// `PtypMultipleGuid`: COUNT field followed by that many [`PropertyType::Guid`].
    MultipleGuid = 0x1048,
    /// `PtypMultipleBinary`: COUNT field followed by that many [`PropertyType::Binary`].
    MultipleBinary = 0x1102,
}

impl PropertyType {
    /// Whether values of this type are stored inline/by-reference at a fixed size, or are
    /// variable-length and always resolved through a heap/sub-node reference.
    pub fn is_fixed_size(self) -> bool {
        !matches!(
            self,
            Self::String8
                | Self::Unicode
                | Self::Binary
                | Self::Object
                | Self::MultipleInteger16
                | Self::MultipleInteger32
                | Self::MultipleFloating32
                | Self::MultipleFloating64
                | Self::MultipleCurrency
                | Self::MultipleFloatingTime
                | Self::MultipleInteger64
                | Self::MultipleString8
                | Self::MultipleUnicode
                | Self::MultipleTime
                | Self::MultipleGuid
                | Self::MultipleBinary
        )
    }

    /// Size in bytes of a fixed-size value; `None` for variable-length types.
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            Self::Null => Some(0),
            Self::Integer16 | Self::Boolean => Some(2),
            Self::Integer32 | Self::Floating32 | Self::ErrorCode => Some(4),
            Self::Floating64 | Self::Currency | Self::FloatingTime | Self::Integer64 | Self::Time => {
                Some(8)
            }
            Self::Guid => Some(16),
            _ => None,
        }
    }
}

impl TryFrom<u16> for PropertyType {
    type Error = LtpError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::Null),
            0x0002 => Ok(Self::Integer16),
            0x0003 => Ok(Self::Integer32),
            0x0004 => Ok(Self::Floating32),
            0x0005 => Ok(Self::Floating64),
            0x0006 => Ok(Self::Currency),
            0x0007 => Ok(Self::FloatingTime),
            0x000A => Ok(Self::ErrorCode),
            0x000B => Ok(Self::Boolean),
            0x000D => Ok(Self::Object),
            0x0014 => Ok(Self::Integer64),
            0x001E => Ok(Self::String8),
            0x001F => Ok(Self::Unicode),
            0x0040 => Ok(Self::Time),
            0x0048 => Ok(Self::Guid),
            0x0102 => Ok(Self::Binary),

            0x1002 => Ok(Self::MultipleInteger16),
            0x1003 => Ok(Self::MultipleInteger32),
            0x1004 => Ok(Self::MultipleFloating32),
            0x1005 => Ok(Self::MultipleFloating64),
            0x1006 => Ok(Self::MultipleCurrency),
            0x1007 => Ok(Self::MultipleFloatingTime),
            0x1014 => Ok(Self::MultipleInteger64),
            0x101E => Ok(Self::MultipleString8),
            0x101F => Ok(Self::MultipleUnicode),
            0x1040 => Ok(Self::MultipleTime),
            0x1048 => Ok(Self::MultipleGuid),
            0x1102 => Ok(Self::MultipleBinary),

            invalid => Err(LtpError::InvalidPropertyType(invalid)),
        }
    }
}

impl From<PropertyType> for u16 {
    fn from(value: PropertyType) -> Self {
        value as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_round_trips() {
        let ty = PropertyType::try_from(0x000D).unwrap();
        assert_eq!(ty, PropertyType::Object);
        assert_eq!(u16::from(ty), 0x000D);
    }

    #[test]
    fn test_fixed_size_classification() {
        assert!(PropertyType::Integer32.is_fixed_size());
        assert!(!PropertyType::Unicode.is_fixed_size());
        assert_eq!(PropertyType::Integer64.fixed_size(), Some(8));
        assert_eq!(PropertyType::Binary.fixed_size(), None);
    }
}
