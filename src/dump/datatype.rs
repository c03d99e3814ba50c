//! Element type and format codec tables
//!
//! Runtime tensors carry the graph engine's internal element type numbering,
//! while dump files use the wire numbering of the dump schema. The two
//! disagree from `INT8` onwards, so every header entry goes through
//! [`ir_data_type`].

macro_rules! numbered_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl $name {
            /// Decode a raw discriminant
            pub fn from_u32(value: u32) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Raw discriminant
            pub fn as_u32(self) -> u32 {
                self as u32
            }
        }
    };
}

numbered_enum! {
    /// Element type as numbered by the graph engine
    #[allow(missing_docs)]
    pub enum GeDataType {
        Float = 0, Float16 = 1, Int8 = 2, Int32 = 3, Uint8 = 4, Int16 = 6, Uint16 = 7,
        Uint32 = 8, Int64 = 9, Uint64 = 10, Double = 11, Bool = 12, String = 13,
        DualSubInt8 = 14, DualSubUint8 = 15, Complex64 = 16, Complex128 = 17, Qint8 = 18,
        Qint16 = 19, Qint32 = 20, Quint8 = 21, Quint16 = 22, Resource = 23, StringRef = 24,
        Dual = 25, Variant = 26, Bf16 = 27, Undefined = 28, Int4 = 29, Uint1 = 30, Int2 = 31,
        Uint2 = 32, Complex32 = 33,
    }
}

numbered_enum! {
    /// Element type as numbered in dump file headers
    #[allow(missing_docs)]
    pub enum OutputDataType {
        Undefined = 0, Float = 1, Float16 = 2, Int8 = 3, Uint8 = 4, Int16 = 5, Uint16 = 6,
        Int32 = 7, Int64 = 8, Uint32 = 9, Uint64 = 10, Bool = 11, Double = 12, String = 13,
        DualSubInt8 = 14, DualSubUint8 = 15, Complex64 = 16, Complex128 = 17, Qint8 = 18,
        Qint16 = 19, Qint32 = 20, Quint8 = 21, Quint16 = 22, Resource = 23, StringRef = 24,
        Dual = 25, Variant = 26, Bf16 = 27, Int4 = 28, Uint1 = 29, Int2 = 30, Uint2 = 31,
        Complex32 = 32,
    }
}

const DATA_TYPE_MAP: &[(GeDataType, OutputDataType, &str)] = &[
    (GeDataType::Undefined, OutputDataType::Undefined, "DT_UNDEFINED"),
    (GeDataType::Float, OutputDataType::Float, "DT_FLOAT"),
    (GeDataType::Float16, OutputDataType::Float16, "DT_FLOAT16"),
    (GeDataType::Int8, OutputDataType::Int8, "DT_INT8"),
    (GeDataType::Uint8, OutputDataType::Uint8, "DT_UINT8"),
    (GeDataType::Int16, OutputDataType::Int16, "DT_INT16"),
    (GeDataType::Uint16, OutputDataType::Uint16, "DT_UINT16"),
    (GeDataType::Int32, OutputDataType::Int32, "DT_INT32"),
    (GeDataType::Int64, OutputDataType::Int64, "DT_INT64"),
    (GeDataType::Uint32, OutputDataType::Uint32, "DT_UINT32"),
    (GeDataType::Uint64, OutputDataType::Uint64, "DT_UINT64"),
    (GeDataType::Bool, OutputDataType::Bool, "DT_BOOL"),
    (GeDataType::Double, OutputDataType::Double, "DT_DOUBLE"),
    (GeDataType::String, OutputDataType::String, "DT_STRING"),
    (GeDataType::DualSubInt8, OutputDataType::DualSubInt8, "DT_DUAL_SUB_INT8"),
    (GeDataType::DualSubUint8, OutputDataType::DualSubUint8, "DT_DUAL_SUB_UINT8"),
    (GeDataType::Complex64, OutputDataType::Complex64, "DT_COMPLEX64"),
    (GeDataType::Complex128, OutputDataType::Complex128, "DT_COMPLEX128"),
    (GeDataType::Qint8, OutputDataType::Qint8, "DT_QINT8"),
    (GeDataType::Qint16, OutputDataType::Qint16, "DT_QINT16"),
    (GeDataType::Qint32, OutputDataType::Qint32, "DT_QINT32"),
    (GeDataType::Quint8, OutputDataType::Quint8, "DT_QUINT8"),
    (GeDataType::Quint16, OutputDataType::Quint16, "DT_QUINT16"),
    (GeDataType::Resource, OutputDataType::Resource, "DT_RESOURCE"),
    (GeDataType::StringRef, OutputDataType::StringRef, "DT_STRING_REF"),
    (GeDataType::Dual, OutputDataType::Dual, "DT_DUAL"),
    (GeDataType::Variant, OutputDataType::Variant, "DT_VARIANT"),
    (GeDataType::Bf16, OutputDataType::Bf16, "DT_BF16"),
    (GeDataType::Int4, OutputDataType::Int4, "DT_INT4"),
    (GeDataType::Uint1, OutputDataType::Uint1, "DT_UINT1"),
    (GeDataType::Int2, OutputDataType::Int2, "DT_INT2"),
    (GeDataType::Uint2, OutputDataType::Uint2, "DT_UINT2"),
    (GeDataType::Complex32, OutputDataType::Complex32, "DT_COMPLEX32"),
];

/// Map an internal element type to its wire value
pub fn ir_data_type(ge: GeDataType) -> OutputDataType {
    DATA_TYPE_MAP
        .iter()
        .find(|(g, _, _)| *g == ge)
        .map(|(_, wire, _)| *wire)
        .unwrap_or(OutputDataType::Undefined)
}

/// Map a raw internal element type; unknown values become `DT_UNDEFINED`
pub fn ir_data_type_raw(ge: u32) -> OutputDataType {
    GeDataType::from_u32(ge).map_or(OutputDataType::Undefined, ir_data_type)
}

/// Map a wire element type back to the internal numbering
pub fn ge_data_type(wire: OutputDataType) -> GeDataType {
    DATA_TYPE_MAP
        .iter()
        .find(|(_, w, _)| *w == wire)
        .map(|(ge, _, _)| *ge)
        .unwrap_or(GeDataType::Undefined)
}

/// Display name of a wire element type
pub fn data_type_name(wire: OutputDataType) -> &'static str {
    DATA_TYPE_MAP
        .iter()
        .find(|(_, w, _)| *w == wire)
        .map_or("DT_UNDEFINED", |(_, _, name)| *name)
}

/// Display name of a raw internal element type
pub fn ge_data_type_name(ge: u32) -> &'static str {
    data_type_name(ir_data_type_raw(ge))
}

/// Size in bytes of one element, when it is a whole number of bytes
pub fn element_size(ge: GeDataType) -> Option<u64> {
    use GeDataType::*;
    match ge {
        Int8 | Uint8 | Bool | Qint8 | Quint8 | DualSubInt8 | DualSubUint8 => Some(1),
        Float16 | Int16 | Uint16 | Bf16 | Qint16 | Quint16 => Some(2),
        Float | Int32 | Uint32 | Qint32 | Complex32 => Some(4),
        Int64 | Uint64 | Double | Complex64 => Some(8),
        Complex128 => Some(16),
        _ => None,
    }
}

/// Format names indexed by primary format value
const FORMAT_NAMES: &[&str] = &[
    "NCHW",
    "NHWC",
    "ND",
    "NC1HWC0",
    "FRACTAL_Z",
    "NC1C0HWPAD",
    "NHWC1C0",
    "FSR_NCHW",
    "FRACTAL_DECONV",
    "C1HWNC0",
    "FRACTAL_DECONV_TRANSPOSE",
    "FRACTAL_DECONV_SP_STRIDE_TRANS",
    "NC1HWC0_C04",
    "FRACTAL_Z_C04",
    "CHWN",
    "FRACTAL_DECONV_SP_STRIDE8_TRANS",
    "HWCN",
    "NC1KHKWHWC0",
    "BN_WEIGHT",
    "FILTER_HWCK",
    "HASHTABLE_LOOKUP_LOOKUPS",
    "HASHTABLE_LOOKUP_KEYS",
    "HASHTABLE_LOOKUP_VALUE",
    "HASHTABLE_LOOKUP_OUTPUT",
    "HASHTABLE_LOOKUP_HITS",
    "C1HWNCoC0",
    "MD",
    "NDHWC",
    "FRACTAL_ZZ",
    "FRACTAL_NZ",
    "NCDHW",
    "DHWCN",
    "NDC1HWC0",
    "FRACTAL_Z_3D",
    "CN",
    "NC",
    "DHWNC",
    "FRACTAL_Z_3D_TRANSPOSE",
    "FRACTAL_ZN_LSTM",
    "FRACTAL_Z_G",
    "RESERVED",
];

/// Primary format carried in the low byte of a packed format
pub fn primary_format(format: u32) -> u32 {
    format & 0xff
}

/// Sub format carried in bits 8..24 of a packed format
pub fn sub_format(format: u32) -> u32 {
    (format >> 8) & 0xffff
}

/// Display name of a packed format
pub fn format_name(format: u32) -> &'static str {
    FORMAT_NAMES
        .get(primary_format(format) as usize)
        .copied()
        .unwrap_or("RESERVED")
}

/// Look up a primary format by display name
pub fn format_from_name(name: &str) -> Option<u32> {
    FORMAT_NAMES.iter().position(|n| *n == name).map(|i| i as u32)
}
