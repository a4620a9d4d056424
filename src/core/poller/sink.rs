use std::io::Write;

use log::{error, info, warn};

use crate::core::ReadResult;

/// Receives every result the poller produces.
pub trait Sink {
    fn accept(&mut self, result: &ReadResult);
}

impl<F> Sink for F
where
    F: FnMut(&ReadResult),
{
    fn accept(&mut self, result: &ReadResult) {
        (self)(result)
    }
}

/// Forwards results to the `log` facade: successes at info, failures at warn.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl Sink for LogSink {
    fn accept(&mut self, result: &ReadResult) {
        if result.is_success() {
            info!("{result}");
        } else {
            warn!("{result}");
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LineFormat {
    #[default]
    Text,
    Json,
}

/// Writes one line per result.
#[derive(Debug)]
pub struct LineSink<W>
where
    W: Write,
{
    writer: W,
    format: LineFormat,
}

impl<W> LineSink<W>
where
    W: Write,
{
    pub fn new(writer: W) -> LineSink<W> {
        LineSink::with_format(writer, LineFormat::Text)
    }

    pub fn with_format(writer: W, format: LineFormat) -> LineSink<W> {
        LineSink { writer, format }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_line(&mut self, result: &ReadResult) -> std::io::Result<()> {
        match self.format {
            LineFormat::Text => writeln!(self.writer, "{result}")?,
            LineFormat::Json => {
                serde_json::to_writer(&mut self.writer, result)?;
                self.writer.write_all(b"\n")?;
            }
        }

        self.writer.flush()
    }
}

impl<W> Sink for LineSink<W>
where
    W: Write,
{
    fn accept(&mut self, result: &ReadResult) {
        // A broken output must not stop polling.
        if let Err(err) = self.write_line(result) {
            error!("Unable to write result for `{}`: {err}", result.name);
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::core::{DataType, Error, RegisterDescriptor, RegisterValue, WordOrder};

    fn descriptor() -> RegisterDescriptor {
        RegisterDescriptor {
            address: 32016,
            quantity: 1,
            name: "pv1_voltage".to_string(),
            scale: 0.1,
            frequency: Duration::from_secs(5),
            measurement: "V".to_string(),
            data_type: DataType::I16,
            word_order: WordOrder::Big,
        }
    }

    #[test]
    fn writes_text_lines() {
        let mut sink = LineSink::new(Vec::new());
        sink.accept(&ReadResult::success(&descriptor(), RegisterValue::I16(205), 1));
        sink.accept(&ReadResult::failure(&descriptor(), &Error::Closed, 3));

        let output = String::from_utf8(sink.into_inner()).expect("Must be utf8");
        let lines: Vec<_> = output.lines().collect();

        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("pv1_voltage = 20.5 V"));
        assert!(lines[1].contains("failed after 3 attempt(s)"));
    }

    #[test]
    fn writes_json_lines() {
        let mut sink = LineSink::with_format(Vec::new(), LineFormat::Json);
        sink.accept(&ReadResult::success(&descriptor(), RegisterValue::I16(205), 1));

        let output = sink.into_inner();
        let value: serde_json::Value =
            serde_json::from_slice(output.trim_ascii_end()).expect("Must be json");

        assert_eq!(value["name"], "pv1_voltage");
        assert_eq!(value["raw"], 205);
        assert_eq!(value["success"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn closures_are_sinks() {
        let mut names = Vec::new();
        let mut sink = |result: &ReadResult| names.push(result.name.clone());

        sink.accept(&ReadResult::failure(&descriptor(), &Error::Closed, 1));
        assert_eq!(names, vec!["pv1_voltage"]);
    }
}
