//! # Report
//!
//! Consumers of [`MeasurementRecord`]s. The [`TableWriter`] renders the comma separated table:
//! one row per working-set size, one column per stride (both in bytes) and an empty field
//! where a trial is unmeasured. Blank means unmeasured, never zero.
use crate::config::SweepConfig;
use crate::sweep::MeasurementRecord;
use crate::timer::CalibrationFactor;
use std::io::{self, Write};
use std::ops::Range;

/// Receives records in measurement order
pub trait RecordSink {
    fn record(&mut self, record: MeasurementRecord) -> io::Result<()>;

    /// Called after the last stride of each working-set size
    fn end_row(&mut self) -> io::Result<()> {
        Ok(())
    }

    /// Called once after the last row
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<MeasurementRecord> {
    fn record(&mut self, record: MeasurementRecord) -> io::Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Streams the latency table to `out`, flushing after every row
pub struct TableWriter<W: Write> {
    out: W,
    row_open: bool,
}

impl<W: Write> TableWriter<W> {
    /// Write the calibration line, the optional buffer address span and the column header
    pub fn new(
        mut out: W,
        config: &SweepConfig,
        factor: CalibrationFactor,
        address_range: Option<Range<usize>>,
    ) -> io::Result<Self> {
        writeln!(out, "TSC tick / ns = {}", factor)?;
        if let Some(range) = address_range {
            writeln!(out, "memory vaddr range: [0x{:016X} - 0x{:016X})", range.start, range.end)?;
        }
        writeln!(out, "row=range[bytes], col=stride[bytes], val=latency[ns]")?;

        write!(out, ", ")?;
        for stride in config.stride_columns() {
            write!(out, "{}, ", stride * config.element_size)?;
        }
        writeln!(out)?;
        out.flush()?;

        Ok(TableWriter {
            out,
            row_open: false,
        })
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> RecordSink for TableWriter<W> {
    fn record(&mut self, record: MeasurementRecord) -> io::Result<()> {
        if !self.row_open {
            write!(self.out, "{}, ", record.working_set_bytes)?;
            self.row_open = true;
        }
        match record.latency_ns {
            Some(latency) => write!(self.out, "{:.6}, ", latency),
            None => write!(self.out, ", "),
        }
    }

    fn end_row(&mut self) -> io::Result<()> {
        if self.row_open {
            writeln!(self.out)?;
            self.row_open = false;
        }
        self.out.flush()
    }

    fn finish(&mut self) -> io::Result<()> {
        self.end_row()
    }
}
