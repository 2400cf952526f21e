//! Append-only CSV result files.
//!
//! Each benchmark flavour has its own record type and header. The header is written exactly
//! once, when the destination is empty, so repeated runs accumulate rows in one file. Numbers are
//! formatted the way C `printf` would (`%.6f`, `%.6e`) so the files stay byte compatible with the
//! historical results.
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

/// `%.6f`
pub fn c_fixed(x: f64) -> String {
    if x.is_nan() {
        "nan".to_owned()
    } else {
        format!("{:.6}", x)
    }
}

/// `%.6e`: six mantissa decimals, signed exponent of at least two digits
pub fn c_exp(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_owned();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_owned();
    }
    let s = format!("{:.6e}", x);
    match s.split_once('e') {
        Some((mantissa, exp)) => {
            let (sign, digits) = match exp.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exp),
            };
            format!("{}e{}{:0>2}", mantissa, sign, digits)
        }
        None => s,
    }
}

/// A row of one of the result files
pub trait CsvRecord {
    const HEADER: &'static str;
    fn row(&self) -> String;
}

/// One distributed trial, immutable once written
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistRecord {
    pub size: usize,
    pub participants: usize,
    pub time_s: f64,
    pub delta_max: f64,
    pub gflops: f64,
}

impl CsvRecord for DistRecord {
    const HEADER: &'static str = "Size,Participants,Time_s,Delta_Max,GFLOPS";
    fn row(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.size,
            self.participants,
            c_fixed(self.time_s),
            c_exp(self.delta_max),
            c_fixed(self.gflops)
        )
    }
}

/// One sequential trial
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SeqRecord {
    pub size: usize,
    pub time_s: f64,
    pub gflops: f64,
}

impl CsvRecord for SeqRecord {
    const HEADER: &'static str = "Size,Time_s,GFLOPS";
    fn row(&self) -> String {
        format!(
            "{},{},{}",
            self.size,
            c_fixed(self.time_s),
            c_fixed(self.gflops)
        )
    }
}

/// One shared memory trial
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SharedRecord {
    pub size: usize,
    pub threads: usize,
    pub time_s: f64,
    pub gflops: f64,
}

impl CsvRecord for SharedRecord {
    const HEADER: &'static str = "Size,Threads,Time_s,GFLOPS";
    fn row(&self) -> String {
        format!(
            "{},{},{},{}",
            self.size,
            self.threads,
            c_fixed(self.time_s),
            c_fixed(self.gflops)
        )
    }
}

/// Writes records of one type, prefixed by the header if the destination started out empty
#[derive(Debug)]
pub struct ResultSink<W: Write> {
    writer: W,
    needs_header: bool,
}

impl<W: Write> ResultSink<W> {
    /// `empty` tells whether the destination currently holds no bytes
    pub fn new(writer: W, empty: bool) -> ResultSink<W> {
        ResultSink {
            writer,
            needs_header: empty,
        }
    }

    pub fn append<R: CsvRecord>(&mut self, record: &R) -> io::Result<()> {
        if self.needs_header {
            writeln!(self.writer, "{}", R::HEADER)?;
            self.needs_header = false;
        }
        writeln!(self.writer, "{}", record.row())?;
        self.writer.flush()
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl ResultSink<File> {
    /// Open `path` for appending, creating it if needed
    pub fn open_append(path: &Path) -> io::Result<ResultSink<File>> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let empty = file.metadata()?.len() == 0;
        Ok(ResultSink::new(file, empty))
    }
}
