pub mod field;

use bitvec::order::Msb0;
use bitvec::slice::BitSlice;
use sqlparser::{
    ast::{CharacterLength, ColumnOption, DataType, Statement, TableConstraint},
    dialect::MySqlDialect,
    parser::Parser,
};
use tracing::{debug, info};

use crate::innodb::charset::InnoDBCharset;
use crate::innodb::{ErrorKind, IbdError};
use field::{ColumnValue, Field, FieldType};

const TRX_ID_LEN: usize = 6;
const ROLL_PTR_LEN: usize = 7;
const SYSTEM_COLUMN_BYTES: usize = TRX_ID_LEN + ROLL_PTR_LEN;

/// A table schema as reconstructed from a `CREATE TABLE` statement:
/// primary-key columns first (or a synthesized `ROWID` pseudo-column, as
/// InnoDB itself does when no PK or all-not-null unique key exists),
/// then every other column in declaration order.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<Field>,
    pub pk_len: usize,
}

impl TableDefinition {
    pub fn try_from_sql_statement(sql: &str) -> anyhow::Result<TableDefinition> {
        let mut parser = Parser::new(&MySqlDialect {}).try_with_sql(sql)?;
        let stmt = parser.parse_statement()?;
        let Statement::CreateTable(parsed_table) = stmt else {
            return Err(anyhow::anyhow!("not a CREATE TABLE statement"));
        };

        let mut table_def = TableDefinition::default();

        let table_charset = match parsed_table.default_charset {
            Some(charset_str) => InnoDBCharset::with_name(&charset_str).unwrap_or(InnoDBCharset::Ascii),
            None => InnoDBCharset::Ascii,
        };

        anyhow::ensure!(parsed_table.name.0.len() == 1, "table name is only 1 part");
        table_def.name = parsed_table.name.0.first().unwrap().value.clone();

        let mut parsed_fields: Vec<Field> = Vec::new();
        for column in parsed_table.columns.iter() {
            let charset = column
                .options
                .iter()
                .map(|opt| &opt.option)
                .filter_map(|opt| match opt {
                    ColumnOption::CharacterSet(name) => {
                        InnoDBCharset::with_name(&name.0.first().unwrap().value).ok()
                    }
                    _ => None,
                })
                .last()
                .unwrap_or(table_charset);

            let f_type = sql_type_to_field_type(&column.data_type, charset);

            let nullable = !column
                .options
                .iter()
                .any(|opt| opt.option == ColumnOption::NotNull);

            parsed_fields.push(Field {
                name: column.name.value.clone(),
                field_type: f_type,
                nullable,
            });
        }

        let mut cluster_index_columns: Vec<String> = Vec::new();
        let mut unique_keys: Vec<Vec<String>> = Vec::new();
        for constraint in parsed_table.constraints.iter() {
            match constraint {
                TableConstraint::PrimaryKey { columns, .. } => {
                    anyhow::ensure!(
                        cluster_index_columns.is_empty(),
                        "multiple PRIMARY KEY constraints"
                    );
                    cluster_index_columns.extend(columns.iter().map(|c| c.value.clone()));
                }
                TableConstraint::Unique { columns, .. } => {
                    unique_keys.push(columns.iter().map(|c| c.value.clone()).collect());
                }
                other => {
                    debug!("ignoring constraint {:?}", other);
                }
            }
        }

        if cluster_index_columns.is_empty() {
            info!("no PRIMARY KEY specified, looking for an all-not-null UNIQUE key");
            for unique in unique_keys.iter() {
                let is_all_not_null = unique.iter().all(|field_name| {
                    parsed_fields
                        .iter()
                        .find(|f| f.name == *field_name)
                        .map(|f| !f.nullable)
                        .unwrap_or(false)
                });
                if is_all_not_null {
                    cluster_index_columns = unique.clone();
                    break;
                }
            }
        }

        let mut columns = Vec::new();
        if cluster_index_columns.is_empty() {
            info!("no usable key found, synthesizing a ROWID clustering column");
            columns.push(Field {
                name: "ROWID".into(),
                field_type: FieldType::Int6(false),
                nullable: false,
            });
        } else {
            for name in cluster_index_columns.iter() {
                let field = parsed_fields
                    .iter()
                    .find(|f| f.name == *name)
                    .ok_or_else(|| anyhow::anyhow!("PRIMARY KEY column {name} not found"))?;
                columns.push(field.clone());
            }
        }
        table_def.pk_len = columns.len();

        for field in parsed_fields.into_iter() {
            if !cluster_index_columns.contains(&field.name) {
                columns.push(field);
            }
        }
        table_def.columns = columns;

        Ok(table_def)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn field_count(&self) -> usize {
        self.columns.len()
    }

    pub fn get_field(&self, name: &str) -> Option<&Field> {
        self.columns.iter().find(|f| f.name == name)
    }

    fn nullable_ordinals(&self) -> Vec<usize> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, f)| f.nullable)
            .map(|(i, _)| i)
            .collect()
    }

    /// Decodes one compact-format record whose data origin is `origin`
    /// within `page` (spec.md §4.5).
    ///
    /// `is_leaf` selects the variable-length-column set per spec.md
    /// §4.5's page-type rule: on a leaf page every variable-length
    /// column's length is encoded and every column is decoded; on an
    /// internal (node-pointer) page only the primary-key columns'
    /// lengths are encoded, the NULL bitmap is absent, and only the
    /// primary-key columns are decoded (a node-pointer record carries no
    /// other column data). `clustered_leaf` additionally gates whether
    /// the 13-byte transaction-id/roll-pointer pair immediately
    /// following the primary key is present and skipped; it only
    /// applies when `is_leaf` is set, on the clustered index.
    pub fn decode_record(
        &self,
        page: &[u8],
        origin: usize,
        is_leaf: bool,
        clustered_leaf: bool,
    ) -> Result<DecodedRecord, IbdError> {
        // The NULL bitmap is present only for leaf records (spec.md §4.5).
        let nullable_ordinals = self.nullable_ordinals();
        let bitmap_size = if is_leaf { nullable_ordinals.len().div_ceil(8) } else { 0 };
        let header_start = origin.checked_sub(5).ok_or_else(|| {
            IbdError::new(ErrorKind::OffsetOutOfPage {
                next_origin: origin as i64 - 5,
            })
        })?;
        let bitmap_start = header_start.checked_sub(bitmap_size).ok_or_else(|| {
            IbdError::new(ErrorKind::OffsetOutOfPage {
                next_origin: header_start as i64 - bitmap_size as i64,
            })
        })?;

        let bitmap_bytes = page.get(bitmap_start..header_start).ok_or_else(|| {
            IbdError::new(ErrorKind::OutOfBounds {
                offset: bitmap_start,
                len: page.len(),
            })
        })?;
        let bits: &BitSlice<u8, Msb0> = BitSlice::from_slice(bitmap_bytes);
        let mut is_null = vec![false; self.columns.len()];
        if is_leaf {
            for (bit_idx, &col_idx) in nullable_ordinals.iter().enumerate() {
                is_null[col_idx] = bits.get(bit_idx).map(|b| *b).unwrap_or(false);
            }
        }

        // Variable-length lengths are stored backward from the null
        // bitmap, in reverse column declaration order, one entry per
        // non-null variable column whose length is encoded for this
        // page type: every variable column on a leaf page, but only the
        // primary-key's variable columns on an internal page.
        let mut lengths = vec![None; self.columns.len()];
        let mut cursor = bitmap_start;
        for (idx, column) in self.columns.iter().enumerate().rev() {
            if !column.field_type.is_variable() || is_null[idx] {
                continue;
            }
            if !is_leaf && idx >= self.pk_len {
                continue;
            }
            let declared_max = column.field_type.max_len();
            let (len, consumed) = read_variable_length(page, cursor, declared_max)?;
            cursor = cursor.checked_sub(consumed).ok_or_else(|| {
                IbdError::new(ErrorKind::OffsetOutOfPage {
                    next_origin: cursor as i64 - consumed as i64,
                })
            })?;
            lengths[idx] = Some(len);
        }

        let mut values = Vec::with_capacity(self.columns.len());
        let mut fwd = origin;
        for (idx, column) in self.columns.iter().enumerate() {
            // Internal (node-pointer) records carry only the primary
            // key's columns, followed by a child page pointer this
            // decoder does not interpret (spec.md §4.5 step 3 applies to
            // leaf records only).
            if !is_leaf && idx >= self.pk_len {
                break;
            }

            if idx == self.pk_len && is_leaf && clustered_leaf {
                fwd += SYSTEM_COLUMN_BYTES;
            }

            if is_null[idx] {
                values.push((column.name.clone(), ColumnValue::Null));
                continue;
            }

            let slice = page.get(fwd..).ok_or_else(|| {
                IbdError::new(ErrorKind::OutOfBounds {
                    offset: fwd,
                    len: page.len(),
                })
            })?;
            let (value, consumed) = column.decode(slice, lengths[idx])?;
            fwd += consumed;
            values.push((column.name.clone(), value));
        }

        Ok(DecodedRecord { origin, fields: values })
    }
}

/// One fully-decoded record: its origin within the page (so a caller can
/// correlate it back to a `RecordCursor`) and its column values in
/// schema-declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    pub origin: usize,
    pub fields: Vec<(String, ColumnValue)>,
}

/// Reads one variable-length header entry ending at `end` (exclusive),
/// per the 1-byte / 2-byte encoding used for compact-format records.
/// Returns `(length, bytes_consumed)`.
fn read_variable_length(page: &[u8], end: usize, declared_max: u64) -> Result<(usize, usize), IbdError> {
    if declared_max <= 255 {
        let pos = end.checked_sub(1).ok_or_else(|| {
            IbdError::new(ErrorKind::OffsetOutOfPage {
                next_origin: end as i64 - 1,
            })
        })?;
        let byte = *page.get(pos).ok_or_else(|| {
            IbdError::new(ErrorKind::OutOfBounds { offset: pos, len: page.len() })
        })?;
        return Ok((byte as usize, 1));
    }

    let pos1 = end.checked_sub(1).ok_or_else(|| {
        IbdError::new(ErrorKind::OffsetOutOfPage {
            next_origin: end as i64 - 1,
        })
    })?;
    let first = *page.get(pos1).ok_or_else(|| {
        IbdError::new(ErrorKind::OutOfBounds { offset: pos1, len: page.len() })
    })?;

    if first & 0x80 == 0 {
        Ok((first as usize, 1))
    } else {
        let pos0 = pos1.checked_sub(1).ok_or_else(|| {
            IbdError::new(ErrorKind::OffsetOutOfPage {
                next_origin: pos1 as i64 - 1,
            })
        })?;
        let second = *page.get(pos0).ok_or_else(|| {
            IbdError::new(ErrorKind::OutOfBounds { offset: pos0, len: page.len() })
        })?;
        if first & 0x40 != 0 {
            return Err(IbdError::new(ErrorKind::OverflowUnsupported));
        }
        let len = (((first & 0x3F) as usize) << 8) | second as usize;
        Ok((len, 2))
    }
}

fn sql_type_to_field_type(data_type: &DataType, charset: InnoDBCharset) -> FieldType {
    match data_type {
        DataType::Char(len_opt) => {
            let final_len = char_length(len_opt, u8::MAX as u64);
            if charset.max_len() == 1 {
                FieldType::Char(final_len as usize, charset)
            } else {
                FieldType::Text(final_len as usize, charset)
            }
        }
        DataType::Varchar(len_opt) => {
            let final_len = char_length(len_opt, u16::MAX as u64);
            FieldType::Text(final_len as usize, charset)
        }
        DataType::Binary(len) => FieldType::Char(len.unwrap_or(1) as usize, InnoDBCharset::Binary),
        DataType::Varbinary(len) => {
            FieldType::Text(len.unwrap_or(u16::MAX as u64) as usize, InnoDBCharset::Binary)
        }
        DataType::Boolean | DataType::Bool => FieldType::Boolean,
        DataType::UnsignedTinyInt(_) => FieldType::TinyInt(false),
        DataType::UnsignedSmallInt(_) => FieldType::SmallInt(false),
        DataType::UnsignedMediumInt(_) => FieldType::MediumInt(false),
        DataType::UnsignedInt(_) => FieldType::Int(false),
        DataType::UnsignedBigInt(_) => FieldType::BigInt(false),
        DataType::TinyInt(_) => FieldType::TinyInt(true),
        DataType::SmallInt(_) => FieldType::SmallInt(true),
        DataType::MediumInt(_) => FieldType::MediumInt(true),
        DataType::Int(_) => FieldType::Int(true),
        DataType::BigInt(_) => FieldType::BigInt(true),
        DataType::Custom(name, _) => match name.0[0].value.to_ascii_lowercase().as_str() {
            "mediumtext" => FieldType::Text((1 << 24) - 1, charset),
            "longtext" => FieldType::Text((1 << 31) - 1, charset),
            "mediumblob" => FieldType::Text((1 << 24) - 1, InnoDBCharset::Binary),
            "longblob" => FieldType::Text((1 << 31) - 1, InnoDBCharset::Binary),
            "year" => FieldType::Year,
            other => FieldType::Unsupported(other.to_owned()),
        },
        DataType::Blob(len) => {
            FieldType::Text(len.unwrap_or((1 << 16) - 1) as usize, InnoDBCharset::Binary)
        }
        DataType::Text => FieldType::Text((1 << 16) - 1, charset),
        DataType::Enum(values) => FieldType::Enum(values.clone()),
        DataType::Date => FieldType::Date,
        DataType::Datetime(precision) => FieldType::DateTime(precision.unwrap_or(0) as u32),
        DataType::Timestamp(precision, _) => FieldType::Timestamp(precision.unwrap_or(0) as u32),
        DataType::Time(precision, _) => FieldType::Time(precision.unwrap_or(0) as u32),
        DataType::Decimal(_) => FieldType::Unsupported("decimal".into()),
        DataType::Float(_) => FieldType::Unsupported("float".into()),
        DataType::Double(_) | DataType::DoublePrecision => FieldType::Unsupported("double".into()),
        other => FieldType::Unsupported(format!("{other:?}")),
    }
}

fn char_length(len_opt: &Option<CharacterLength>, default: u64) -> u64 {
    match len_opt {
        Some(CharacterLength::IntegerLength { length, .. }) => *length,
        Some(CharacterLength::Max) | None => default,
    }
}
