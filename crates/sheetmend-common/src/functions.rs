//! Function catalog consulted by batch validation and formula repair.

use once_cell::sync::Lazy;
use rustc_hash::FxHashSet;

/// Functions the formula engine is expected to evaluate.
pub const SUPPORTED_FUNCTIONS: &[&str] = &[
    // math & aggregation
    "ABS", "AGGREGATE", "AVERAGE", "AVERAGEA", "AVERAGEIF", "AVERAGEIFS", "CEILING",
    "CEILING.MATH", "COUNT", "COUNTA", "COUNTBLANK", "COUNTIF", "COUNTIFS", "EVEN", "EXP",
    "FLOOR", "FLOOR.MATH", "INT", "LN", "LOG", "LOG10", "MAX", "MAXA", "MAXIFS", "MEDIAN", "MIN",
    "MINA", "MINIFS", "MOD", "MODE", "ODD", "PI", "POWER", "PRODUCT", "QUOTIENT", "RAND",
    "RANDARRAY", "RANDBETWEEN", "ROUND", "ROUNDDOWN", "ROUNDUP", "SEQUENCE", "SIGN", "SQRT",
    "STDEV", "STDEV.P", "STDEV.S", "SUBTOTAL", "SUM", "SUMIF", "SUMIFS", "SUMPRODUCT", "SUMSQ",
    "TRUNC", "VAR", "VAR.P", "VAR.S", "LARGE", "SMALL", "RANK", "RANK.EQ", "PERCENTILE",
    "QUARTILE", "CORREL", "FORECAST", "GROWTH", "TREND", "SLOPE", "INTERCEPT",
    // logical
    "AND", "FALSE", "IF", "IFERROR", "IFNA", "IFS", "NOT", "OR", "SWITCH", "TRUE", "XOR",
    // lookup & reference
    "ADDRESS", "CHOOSE", "COLUMN", "COLUMNS", "FILTER", "HLOOKUP", "INDEX", "INDIRECT", "LOOKUP",
    "MATCH", "OFFSET", "ROW", "ROWS", "SORT", "SORTBY", "TRANSPOSE", "UNIQUE", "VLOOKUP",
    "XLOOKUP", "XMATCH",
    // text
    "CHAR", "CLEAN", "CODE", "CONCAT", "CONCATENATE", "EXACT", "FIND", "FIXED", "LEFT", "LEN",
    "LOWER", "MID", "PROPER", "REPLACE", "REPT", "RIGHT", "SEARCH", "SUBSTITUTE", "T", "TEXT",
    "TEXTJOIN", "TRIM", "UPPER", "VALUE", "TEXTBEFORE", "TEXTAFTER", "TEXTSPLIT",
    // date & time
    "DATE", "DATEDIF", "DATEVALUE", "DAY", "DAYS", "EDATE", "EOMONTH", "HOUR", "MINUTE", "MONTH",
    "NETWORKDAYS", "NOW", "SECOND", "TIME", "TIMEVALUE", "TODAY", "WEEKDAY", "WEEKNUM", "WORKDAY",
    "YEAR", "YEARFRAC",
    // financial
    "FV", "IPMT", "IRR", "NPER", "NPV", "PMT", "PPMT", "PV", "RATE", "XIRR", "XNPV",
    // information
    "CELL", "INFO", "ISBLANK", "ISERR", "ISERROR", "ISEVEN", "ISLOGICAL", "ISNA", "ISNONTEXT",
    "ISNUMBER", "ISODD", "ISREF", "ISTEXT", "N", "NA", "TYPE",
    // dynamic
    "LET", "LAMBDA",
];

/// Functions that recalculate on every change anywhere in the workbook.
pub const VOLATILE_FUNCTIONS: &[&str] = &[
    "NOW", "TODAY", "RAND", "RANDARRAY", "RANDBETWEEN", "OFFSET", "INDIRECT", "CELL", "INFO",
];

static SUPPORTED: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| SUPPORTED_FUNCTIONS.iter().copied().collect());

static VOLATILE: Lazy<FxHashSet<&'static str>> =
    Lazy::new(|| VOLATILE_FUNCTIONS.iter().copied().collect());

pub fn is_supported_function(name: &str) -> bool {
    SUPPORTED.contains(name.to_ascii_uppercase().as_str())
}

pub fn is_volatile_function(name: &str) -> bool {
    VOLATILE.contains(name.to_ascii_uppercase().as_str())
}
