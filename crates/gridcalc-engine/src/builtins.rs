//! Built-in spreadsheet functions (Rust).
//!
//! Conventions:
//! - Spreadsheet-facing built-in names are ALL CAPS (e.g. `SUM`, `AVG`).
//! - Reference lookups (`CELL`, `RANGE`, ...) and operator helpers (`DIV`,
//!   `TRUTHY`, ...) are what compiled formulas call; users rarely write
//!   them directly.
//! - Failures are thrown as strings so they land on the cell verbatim.

use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, Timelike};
use rand::Rng;
use rhai::{Array, Dynamic, Engine, EvalAltResult, ImmutableString, Map, Position};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use crate::engine::eval::SharedProvider;
use crate::engine::range::{SheetRange, lookup};
use crate::engine::{Bounds, CellRef, Worksheet, format_dynamic};

type RhaiResult<T> = Result<T, Box<EvalAltResult>>;

fn invalid_arg(message: &str) -> Box<EvalAltResult> {
    EvalAltResult::ErrorRuntime(message.into(), Position::NONE).into()
}

fn to_usize(value: i64, label: &str) -> RhaiResult<usize> {
    match usize::try_from(value) {
        Ok(v) if v > 0 => Ok(v),
        _ => Err(invalid_arg(&format!("{} must be >= 1", label))),
    }
}

fn to_decimal_places(value: i64) -> RhaiResult<usize> {
    const MAX_DECIMALS: usize = 12;
    let places = usize::try_from(value).map_err(|_| invalid_arg("decimals must be >= 0"))?;
    if places > MAX_DECIMALS {
        return Err(invalid_arg(&format!(
            "decimals must be <= {}",
            MAX_DECIMALS
        )));
    }
    Ok(places)
}

fn fixed_decimal_string(n: f64, decimals: usize) -> String {
    if n.is_nan() {
        return "#NAN!".to_string();
    }
    if n.is_infinite() {
        return "#INF!".to_string();
    }
    format!("{:.*}", decimals, n)
}

fn money_string(n: f64, symbol: &str, decimals: usize) -> String {
    if n.is_nan() || n.is_infinite() {
        return fixed_decimal_string(n, decimals);
    }
    let sign = if n.is_sign_negative() { "-" } else { "" };
    format!("{}{}{}", sign, symbol, fixed_decimal_string(n.abs(), decimals))
}

/// Unit, `false`, zero and empty containers are false; everything else is true.
pub(crate) fn truthy(value: &Dynamic) -> bool {
    if value.is_unit() {
        false
    } else if let Ok(b) = value.as_bool() {
        b
    } else if let Ok(n) = value.as_int() {
        n != 0
    } else if let Ok(n) = value.as_float() {
        n != 0.0
    } else if let Ok(s) = value.as_immutable_string_ref() {
        !s.is_empty()
    } else if let Ok(a) = value.as_array_ref() {
        !a.is_empty()
    } else if value.is_map() {
        !value.clone().cast::<Map>().is_empty()
    } else if let Some(range) = value.clone().try_cast::<SheetRange>() {
        !range.is_empty()
    } else {
        true
    }
}

/// Numbers across scalars, arrays and ranges. Anything else is skipped.
fn collect_numbers(args: &[Dynamic]) -> RhaiResult<(Vec<f64>, bool)> {
    fn walk(value: &Dynamic, out: &mut Vec<f64>, all_int: &mut bool) -> RhaiResult<()> {
        if let Some(range) = value.clone().try_cast::<SheetRange>() {
            range.try_for_each(|e| invalid_arg(&e), |item| walk(&item, out, all_int))?;
        } else if let Ok(items) = value.as_array_ref() {
            for item in items.iter() {
                walk(item, out, all_int)?;
            }
        } else if let Ok(n) = value.as_int() {
            out.push(n as f64);
        } else if let Ok(n) = value.as_float() {
            *all_int = false;
            out.push(n);
        }
        Ok(())
    }
    let mut out = Vec::new();
    let mut all_int = true;
    for arg in args {
        walk(arg, &mut out, &mut all_int)?;
    }
    Ok((out, all_int))
}

fn numeric_result(n: f64, as_int: bool) -> Dynamic {
    if as_int && n.abs() < 9.0e15 {
        Dynamic::from(n as i64)
    } else {
        Dynamic::from(n)
    }
}

fn sum_values(args: &[Dynamic]) -> RhaiResult<Dynamic> {
    let (numbers, all_int) = collect_numbers(args)?;
    Ok(numeric_result(numbers.iter().sum(), all_int))
}

fn average_values(args: &[Dynamic]) -> RhaiResult<Dynamic> {
    let (numbers, _) = collect_numbers(args)?;
    if numbers.is_empty() {
        return Err(invalid_arg("AVERAGE of no numbers"));
    }
    Ok(Dynamic::from(numbers.iter().sum::<f64>() / numbers.len() as f64))
}

fn min_value(args: &[Dynamic]) -> RhaiResult<Dynamic> {
    let (numbers, all_int) = collect_numbers(args)?;
    numbers
        .into_iter()
        .reduce(f64::min)
        .map(|n| numeric_result(n, all_int))
        .ok_or_else(|| invalid_arg("MIN of no numbers"))
}

fn max_value(args: &[Dynamic]) -> RhaiResult<Dynamic> {
    let (numbers, all_int) = collect_numbers(args)?;
    numbers
        .into_iter()
        .reduce(f64::max)
        .map(|n| numeric_result(n, all_int))
        .ok_or_else(|| invalid_arg("MAX of no numbers"))
}

/// Non-empty values across scalars, arrays and ranges.
fn count_values(args: &[Dynamic]) -> RhaiResult<Dynamic> {
    fn walk(value: &Dynamic) -> RhaiResult<i64> {
        if let Some(range) = value.clone().try_cast::<SheetRange>() {
            let mut total = 0;
            range.try_for_each(|e| invalid_arg(&e), |item| {
                total += walk(&item)?;
                Ok(())
            })?;
            return Ok(total);
        }
        if let Ok(items) = value.as_array_ref() {
            return items.iter().map(walk).sum();
        }
        let empty = value.is_unit() || value.as_immutable_string_ref().is_ok_and(|s| s.is_empty());
        Ok(if empty { 0 } else { 1 })
    }
    let total: RhaiResult<i64> = args.iter().map(walk).sum();
    Ok(Dynamic::from(total?))
}

type Aggregate = fn(&[Dynamic]) -> RhaiResult<Dynamic>;

/// Register `f` for one to eight arguments.
fn register_aggregate(engine: &mut Engine, name: &str, f: Aggregate) {
    engine.register_fn(name, move |a: Dynamic| f(&[a]));
    engine.register_fn(name, move |a: Dynamic, b: Dynamic| f(&[a, b]));
    engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic| f(&[a, b, c]));
    engine.register_fn(name, move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic| {
        f(&[a, b, c, d])
    });
    engine.register_fn(
        name,
        move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic| f(&[a, b, c, d, e]),
    );
    engine.register_fn(
        name,
        move |a: Dynamic, b: Dynamic, c: Dynamic, d: Dynamic, e: Dynamic, g: Dynamic| {
            f(&[a, b, c, d, e, g])
        },
    );
    engine.register_fn(
        name,
        move |a: Dynamic,
              b: Dynamic,
              c: Dynamic,
              d: Dynamic,
              e: Dynamic,
              g: Dynamic,
              h: Dynamic| { f(&[a, b, c, d, e, g, h]) },
    );
    engine.register_fn(
        name,
        move |a: Dynamic,
              b: Dynamic,
              c: Dynamic,
              d: Dynamic,
              e: Dynamic,
              g: Dynamic,
              h: Dynamic,
              i: Dynamic| { f(&[a, b, c, d, e, g, h, i]) },
    );
}

fn floor_div(a: i64, b: i64) -> RhaiResult<i64> {
    if b == 0 {
        return Err(invalid_arg("integer division or modulo by zero"));
    }
    let q = a / b;
    Ok(if a % b != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q })
}

fn divide(a: f64, b: f64) -> RhaiResult<f64> {
    if b == 0.0 {
        return Err(invalid_arg("division by zero"));
    }
    Ok(a / b)
}

fn int_pow(base: i64, exp: i64) -> Dynamic {
    match u32::try_from(exp).ok().and_then(|e| base.checked_pow(e)) {
        Some(n) => Dynamic::from(n),
        None => Dynamic::from((base as f64).powf(exp as f64)),
    }
}

/// Positions selected by a `lo:hi:step` slice of a sequence of `len` items.
fn slice_positions(len: usize, lo: &Dynamic, hi: &Dynamic, step: &Dynamic) -> RhaiResult<Vec<usize>> {
    let bound = |value: &Dynamic, label: &str| -> RhaiResult<Option<i64>> {
        if value.is_unit() {
            Ok(None)
        } else {
            value
                .as_int()
                .map(Some)
                .map_err(|_| invalid_arg(&format!("slice {} must be an integer", label)))
        }
    };
    let len = len as i64;
    let step = bound(step, "step")?.unwrap_or(1);
    if step == 0 {
        return Err(invalid_arg("slice step cannot be zero"));
    }
    let resolve = |index: i64, low: i64, high: i64| {
        let index = if index < 0 { index + len } else { index };
        index.clamp(low, high)
    };
    let mut positions = Vec::new();
    if step > 0 {
        let mut i = bound(lo, "start")?.map_or(0, |i| resolve(i, 0, len));
        let end = bound(hi, "stop")?.map_or(len, |i| resolve(i, 0, len));
        while i < end {
            positions.push(i as usize);
            i += step;
        }
    } else {
        let mut i = bound(lo, "start")?.map_or(len - 1, |i| resolve(i, -1, len - 1));
        let end = bound(hi, "stop")?.map_or(-1, |i| resolve(i, -1, len - 1));
        while i > end {
            positions.push(i as usize);
            i += step;
        }
    }
    Ok(positions)
}

fn slice(target: Dynamic, lo: Dynamic, hi: Dynamic, step: Dynamic) -> RhaiResult<Dynamic> {
    if let Ok(items) = target.as_array_ref() {
        let positions = slice_positions(items.len(), &lo, &hi, &step)?;
        let out: Array = positions.into_iter().map(|i| items[i].clone()).collect();
        return Ok(Dynamic::from(out));
    }
    if let Ok(text) = target.as_immutable_string_ref() {
        let chars: Vec<char> = text.chars().collect();
        let positions = slice_positions(chars.len(), &lo, &hi, &step)?;
        let out: String = positions.into_iter().map(|i| chars[i]).collect();
        return Ok(Dynamic::from(out));
    }
    Err(invalid_arg(&format!("'{}' object is not sliceable", target.type_name())))
}

/// Items of anything a comprehension can loop over.
fn iter_values(value: Dynamic) -> RhaiResult<Array> {
    if let Some(range) = value.clone().try_cast::<SheetRange>() {
        return range.values().map_err(|e| invalid_arg(&e));
    }
    if value.is_array() {
        return Ok(value.cast::<Array>());
    }
    if let Ok(text) = value.as_immutable_string_ref() {
        return Ok(text.chars().map(|c| Dynamic::from(c.to_string())).collect());
    }
    if value.is_map() {
        let map = value.cast::<Map>();
        return Ok(map.keys().map(|k| Dynamic::from(k.to_string())).collect());
    }
    Err(invalid_arg(&format!("'{}' object is not iterable", value.type_name())))
}

fn range_index(range: &SheetRange, index: &Array) -> RhaiResult<CellRef> {
    let [col, row] = index.as_slice() else {
        return Err(invalid_arg("Cell ranges are indexed by [col, row]"));
    };
    let (Ok(col), Ok(row)) = (col.as_int(), row.as_int()) else {
        return Err(invalid_arg("Cell range indices must be integers"));
    };
    range.location(col, row).map_err(|e| invalid_arg(&e))
}

fn used_bounds(worksheet: &Worksheet) -> Bounds {
    worksheet.bounds().unwrap_or_else(|| Bounds::new(1, 1, 1, 1))
}

fn resolve_worksheet(current: &Worksheet, provider: &SharedProvider, name: &str) -> RhaiResult<Worksheet> {
    let installed = provider.read().unwrap_or_else(|e| e.into_inner()).clone();
    let found = match installed {
        Some(provider) => provider(name),
        None if current.name().eq_ignore_ascii_case(name) => Some(current.clone()),
        None => None,
    };
    found.ok_or_else(|| invalid_arg(&format!("No worksheet named '{}'", name)))
}

/// Register all built-in functions into the Rhai engine.
///
/// Ranges built here stop iterating once `interrupted` is raised.
pub(crate) fn register_builtins(
    engine: &mut Engine,
    worksheet: &Worksheet,
    provider: SharedProvider,
    interrupted: Option<Arc<AtomicBool>>,
) {
    register_range_type(engine);
    register_worksheet_type(engine);
    register_dates(engine);

    // CELL(col, row): the cell's value; a cell holding an error rethrows it.
    let grid_cell = worksheet.grid().clone();
    engine.register_fn("CELL", move |col: i64, row: i64| -> RhaiResult<Dynamic> {
        let location = CellRef::new(to_usize(col, "column")?, to_usize(row, "row")?);
        lookup(&grid_cell, location).map_err(|e| invalid_arg(&e))
    });

    // RANGE(left, top, right, bottom)
    let grid_range = worksheet.grid().clone();
    let flag = interrupted.clone();
    engine.register_fn(
        "RANGE",
        move |c1: i64, r1: i64, c2: i64, r2: i64| -> RhaiResult<SheetRange> {
            let a = CellRef::new(to_usize(c1, "column")?, to_usize(r1, "row")?);
            let b = CellRef::new(to_usize(c2, "column")?, to_usize(r2, "row")?);
            Ok(SheetRange::new(grid_range.clone(), Bounds::from_corners(a, b))
                .with_interrupt(flag.clone()))
        },
    );

    // COLUMN_RANGE(col): the column down to the last used row.
    let ws_column = worksheet.clone();
    let flag = interrupted.clone();
    engine.register_fn("COLUMN_RANGE", move |col: i64| -> RhaiResult<SheetRange> {
        let col = to_usize(col, "column")?;
        let bottom = used_bounds(&ws_column).bottom;
        Ok(SheetRange::new(ws_column.grid().clone(), Bounds::new(col, 1, col, bottom))
            .with_interrupt(flag.clone()))
    });

    // ROW_RANGE(row): the row across to the last used column.
    let ws_row = worksheet.clone();
    let flag = interrupted.clone();
    engine.register_fn("ROW_RANGE", move |row: i64| -> RhaiResult<SheetRange> {
        let row = to_usize(row, "row")?;
        let right = used_bounds(&ws_row).right;
        Ok(SheetRange::new(ws_row.grid().clone(), Bounds::new(1, row, right, row))
            .with_interrupt(flag.clone()))
    });

    // NAMED_COLUMN_RANGE(header): the column headed `header` in row 1,
    // excluding the header itself.
    let ws_named_col = worksheet.clone();
    let flag = interrupted.clone();
    engine.register_fn("NAMED_COLUMN_RANGE", move |header: &str| -> RhaiResult<SheetRange> {
        let col = ws_named_col
            .named_column(header)
            .ok_or_else(|| invalid_arg(&format!("No column with header '{}'", header)))?;
        let bottom = used_bounds(&ws_named_col).bottom.max(2);
        Ok(SheetRange::new(ws_named_col.grid().clone(), Bounds::new(col, 2, col, bottom))
            .with_interrupt(flag.clone()))
    });

    // NAMED_ROW_RANGE(header): the row headed `header` in column A,
    // excluding the header itself.
    let ws_named_row = worksheet.clone();
    let flag = interrupted;
    engine.register_fn("NAMED_ROW_RANGE", move |header: &str| -> RhaiResult<SheetRange> {
        let row = ws_named_row
            .named_row(header)
            .ok_or_else(|| invalid_arg(&format!("No row with header '{}'", header)))?;
        let right = used_bounds(&ws_named_row).right.max(2);
        Ok(SheetRange::new(ws_named_row.grid().clone(), Bounds::new(2, row, right, row))
            .with_interrupt(flag.clone()))
    });

    // WORKSHEET_REF(name)
    let ws_ref = worksheet.clone();
    engine.register_fn("WORKSHEET_REF", move |name: &str| -> RhaiResult<Worksheet> {
        resolve_worksheet(&ws_ref, &provider, name)
    });

    register_operators(engine);
    register_aggregates(engine);
    register_maths(engine);
    register_formatting(engine);
}

/// Helpers that compiled operators and constructs call into.
fn register_operators(engine: &mut Engine) {
    engine.register_fn("TRUTHY", |value: Dynamic| -> bool { truthy(&value) });

    // RAISE(message): fail with `message` as the cell's error text.
    engine.register_fn("RAISE", |message: &str| -> RhaiResult<Dynamic> {
        Err(invalid_arg(message))
    });

    // CONCAT(a, b): integers combine bitwise, everything else as text.
    engine.register_fn("CONCAT", |a: Dynamic, b: Dynamic| -> Dynamic {
        match (a.as_int(), b.as_int()) {
            (Ok(x), Ok(y)) => Dynamic::from(x & y),
            _ => Dynamic::from(format!("{}{}", format_dynamic(&a), format_dynamic(&b))),
        }
    });

    engine.register_fn("DIV", |a: f64, b: f64| divide(a, b));
    engine.register_fn("DIV", |a: f64, b: i64| divide(a, b as f64));
    engine.register_fn("DIV", |a: i64, b: f64| divide(a as f64, b));
    engine.register_fn("DIV", |a: i64, b: i64| divide(a as f64, b as f64));

    engine.register_fn("FLOORDIV", floor_div);
    engine.register_fn("FLOORDIV", |a: f64, b: f64| divide(a, b).map(f64::floor));
    engine.register_fn("FLOORDIV", |a: f64, b: i64| divide(a, b as f64).map(f64::floor));
    engine.register_fn("FLOORDIV", |a: i64, b: f64| divide(a as f64, b).map(f64::floor));

    engine.register_fn("PERCENT", |n: f64| -> f64 { n / 100.0 });
    engine.register_fn("PERCENT", |n: i64| -> f64 { n as f64 / 100.0 });

    // POW(base, exp): integers stay integers while the result fits.
    engine.register_fn("POW", |base: f64, exp: f64| -> f64 { base.powf(exp) });
    engine.register_fn("POW", |base: f64, exp: i64| -> f64 { base.powf(exp as f64) });
    engine.register_fn("POW", |base: i64, exp: f64| -> f64 { (base as f64).powf(exp) });
    engine.register_fn("POW", int_pow);

    engine.register_fn("BITNOT", |n: i64| -> i64 { !n });

    engine.register_fn("SLICE", slice);
    engine.register_fn("ITER", iter_values);

    // DICT([[key, value], ...])
    engine.register_fn("DICT", |pairs: Array| -> RhaiResult<Map> {
        let mut map = Map::new();
        for pair in pairs {
            let Ok(pair) = pair.into_array() else {
                return Err(invalid_arg("dictionary entries must be [key, value] pairs"));
            };
            let [key, value] = pair.as_slice() else {
                return Err(invalid_arg("dictionary entries must be [key, value] pairs"));
            };
            map.insert(format_dynamic(key).into(), value.clone());
        }
        Ok(map)
    });
}

fn register_aggregates(engine: &mut Engine) {
    register_aggregate(engine, "SUM", sum_values);
    register_aggregate(engine, "sum", sum_values);
    register_aggregate(engine, "AVERAGE", average_values);
    register_aggregate(engine, "AVG", average_values);
    register_aggregate(engine, "MIN", min_value);
    register_aggregate(engine, "MAX", max_value);
    register_aggregate(engine, "COUNT", count_values);
}

fn register_maths(engine: &mut Engine) {
    // SQRT(x): square root
    engine.register_fn("SQRT", |x: f64| -> f64 { x.sqrt() });
    engine.register_fn("SQRT", |x: i64| -> f64 { (x as f64).sqrt() });

    // ROUND(x[, digits]): round half away from zero.
    engine.register_fn("ROUND", |x: f64| -> i64 { x.round() as i64 });
    engine.register_fn("ROUND", |x: i64| -> i64 { x });
    engine.register_fn("ROUND", |x: f64, digits: i64| -> f64 {
        let factor = 10f64.powi(digits.clamp(-15, 15) as i32);
        (x * factor).round() / factor
    });
    engine.register_fn("ROUND", |x: i64, _digits: i64| -> i64 { x });

    // RAND(): random float in [0.0, 1.0)
    engine.register_fn("RAND", || -> f64 { rand::thread_rng().r#gen() });

    // RANDINT(min, max): random integer in [min, max] inclusive
    engine.register_fn("RANDINT", |min: i64, max: i64| -> RhaiResult<i64> {
        if min > max {
            return Err(invalid_arg("RANDINT: min must be <= max"));
        }
        Ok(rand::thread_rng().r#gen_range(min..=max))
    });
}

fn register_formatting(engine: &mut Engine) {
    // FIXED(n, decimals): format with a fixed number of decimal places.
    engine.register_fn("FIXED", |n: f64, decimals: i64| -> RhaiResult<String> {
        Ok(fixed_decimal_string(n, to_decimal_places(decimals)?))
    });
    engine.register_fn("FIXED", |n: i64, decimals: i64| -> RhaiResult<String> {
        Ok(fixed_decimal_string(n as f64, to_decimal_places(decimals)?))
    });

    // MONEY(n, symbol[, decimals]): format as currency (no separators).
    // Examples:
    //   MONEY(15.0424, "£")    -> "£15.04"
    //   MONEY(-2, "$", 0)      -> "-$2"
    engine.register_fn("MONEY", |n: f64, symbol: &str| -> String {
        money_string(n, symbol, 2)
    });
    engine.register_fn("MONEY", |n: i64, symbol: &str| -> String {
        money_string(n as f64, symbol, 2)
    });
    engine.register_fn("MONEY", |n: f64, symbol: &str, decimals: i64| -> RhaiResult<String> {
        Ok(money_string(n, symbol, to_decimal_places(decimals)?))
    });
    engine.register_fn("MONEY", |n: i64, symbol: &str, decimals: i64| -> RhaiResult<String> {
        Ok(money_string(n as f64, symbol, to_decimal_places(decimals)?))
    });
}

/// The `CellRange` type: bounds, values, membership, `[[col, row]]`
/// indexing and iteration.
fn register_range_type(engine: &mut Engine) {
    engine.register_type_with_name::<SheetRange>("CellRange");
    engine.register_iterator::<SheetRange>();
    engine.register_get("left", |r: &mut SheetRange| r.bounds().left as i64);
    engine.register_get("top", |r: &mut SheetRange| r.bounds().top as i64);
    engine.register_get("right", |r: &mut SheetRange| r.bounds().right as i64);
    engine.register_get("bottom", |r: &mut SheetRange| r.bounds().bottom as i64);
    engine.register_fn("len", |r: &mut SheetRange| r.len() as i64);
    engine.register_fn("values", |r: &mut SheetRange| -> RhaiResult<Array> {
        r.values().map_err(|e| invalid_arg(&e))
    });
    engine.register_fn("contains", |r: &mut SheetRange, value: Dynamic| -> RhaiResult<bool> {
        r.contains(&value).map_err(|e| invalid_arg(&e))
    });
    engine.register_indexer_get(|r: &mut SheetRange, index: Array| -> RhaiResult<Dynamic> {
        let location = range_index(r, &index)?;
        r.value_at(location).map_err(|e| invalid_arg(&e))
    });
    engine.register_fn("to_string", |r: &mut SheetRange| r.to_string());
}

/// Worksheets returned by `<Name>` references.
fn register_worksheet_type(engine: &mut Engine) {
    engine.register_type_with_name::<Worksheet>("Worksheet");
    engine.register_get("name", |ws: &mut Worksheet| ws.name().to_string());
    engine.register_indexer_get(|ws: &mut Worksheet, index: Array| -> RhaiResult<Dynamic> {
        let [col, row] = index.as_slice() else {
            return Err(invalid_arg("Worksheets are indexed by [col, row]"));
        };
        let (Ok(col), Ok(row)) = (col.as_int(), row.as_int()) else {
            return Err(invalid_arg("Worksheet indices must be integers"));
        };
        let location = CellRef::new(to_usize(col, "column")?, to_usize(row, "row")?);
        lookup(ws.grid(), location).map_err(|e| invalid_arg(&e))
    });
    engine.register_indexer_get(|ws: &mut Worksheet, name: ImmutableString| -> RhaiResult<Dynamic> {
        let location = CellRef::from_str(&name)
            .ok_or_else(|| invalid_arg(&format!("Invalid cell name '{}'", name)))?;
        lookup(ws.grid(), location).map_err(|e| invalid_arg(&e))
    });
    engine.register_fn("to_string", |ws: &mut Worksheet| format!("<Worksheet {}>", ws.name()));
}

fn register_dates(engine: &mut Engine) {
    engine.register_type_with_name::<NaiveDateTime>("DateTime");
    engine.register_type_with_name::<NaiveDate>("Date");

    engine.register_fn("NOW", || Local::now().naive_local());
    engine.register_fn("TODAY", || Local::now().date_naive());
    engine.register_fn("DATE", |y: i64, m: i64, d: i64| -> RhaiResult<NaiveDate> {
        date_from_parts(y, m, d)
    });
    engine.register_fn(
        "DATETIME",
        |y: i64, m: i64, d: i64, h: i64, mi: i64, s: i64| -> RhaiResult<NaiveDateTime> {
            let (Ok(h), Ok(mi), Ok(s)) = (u32::try_from(h), u32::try_from(mi), u32::try_from(s))
            else {
                return Err(invalid_arg("DATETIME: invalid time"));
            };
            date_from_parts(y, m, d)?
                .and_hms_opt(h, mi, s)
                .ok_or_else(|| invalid_arg("DATETIME: invalid time"))
        },
    );

    engine.register_get("year", |d: &mut NaiveDate| d.year() as i64);
    engine.register_get("month", |d: &mut NaiveDate| d.month() as i64);
    engine.register_get("day", |d: &mut NaiveDate| d.day() as i64);
    engine.register_get("weekday", |d: &mut NaiveDate| d.weekday().num_days_from_monday() as i64);
    engine.register_fn("-", |a: NaiveDate, b: NaiveDate| (a - b).num_days());
    engine.register_fn("to_string", |d: &mut NaiveDate| d.format("%Y-%m-%d").to_string());

    engine.register_get("year", |d: &mut NaiveDateTime| d.year() as i64);
    engine.register_get("month", |d: &mut NaiveDateTime| d.month() as i64);
    engine.register_get("day", |d: &mut NaiveDateTime| d.day() as i64);
    engine.register_get("hour", |d: &mut NaiveDateTime| d.hour() as i64);
    engine.register_get("minute", |d: &mut NaiveDateTime| d.minute() as i64);
    engine.register_get("second", |d: &mut NaiveDateTime| d.second() as i64);
    engine.register_get("date", |d: &mut NaiveDateTime| d.date());
    engine.register_fn("to_string", |d: &mut NaiveDateTime| {
        d.format("%Y-%m-%d %H:%M:%S").to_string()
    });
}

fn date_from_parts(y: i64, m: i64, d: i64) -> RhaiResult<NaiveDate> {
    let parts = i32::try_from(y)
        .ok()
        .zip(u32::try_from(m).ok())
        .zip(u32::try_from(d).ok());
    parts
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .ok_or_else(|| invalid_arg(&format!("DATE: invalid date {}-{}-{}", y, m, d)))
}
