//! Invocation extraction: walk a kickstart XML document and fold its mainjob
//! and machine elements into an [`InvocationRecord`].
//!
//! Elements are recognized only inside the invocation namespace and only at
//! their schema positions, so `usage` blocks of setup steps or of the wrapper
//! itself never leak into the job's numbers.

use crate::config::ParserConfig;
use crate::record::{
    classify, Aggregates, CpuInfo, InvocationRecord, JobType, ProcSample, RecordHeader,
    UsageSample,
};
use quick_xml::encoding::Decoder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::{NsReader, Reader};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Errors produced while extracting an invocation record.
///
/// Only `Io`, `NoRoot`, `MissingTransformation` and errors raised before the
/// root element was read leave [`extract`]; everything else degrades to a
/// partial record.
#[derive(Debug)]
pub enum ExtractError {
    Io { path: PathBuf, source: std::io::Error },
    Xml(quick_xml::Error),
    /// A recognized element lacks a required attribute or carries an unparsable value.
    Attribute {
        element: &'static str,
        name: &'static str,
        value: Option<String>,
    },
    /// End of input reached with open elements.
    Truncated { open: usize },
    /// The document holds no root element.
    NoRoot,
    /// The root element has no `transformation` attribute.
    MissingTransformation,
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Io { path, source } => {
                write!(f, "failed to read {}: {}", path.display(), source)
            }
            ExtractError::Xml(e) => write!(f, "malformed XML: {e}"),
            ExtractError::Attribute {
                element,
                name,
                value: Some(value),
            } => write!(f, "invalid {element}@{name} value {value:?}"),
            ExtractError::Attribute {
                element,
                name,
                value: None,
            } => write!(f, "missing {element}@{name} attribute"),
            ExtractError::Truncated { open } => {
                write!(f, "document ends with {open} unclosed element(s)")
            }
            ExtractError::NoRoot => write!(f, "document has no root element"),
            ExtractError::MissingTransformation => {
                write!(f, "root element has no transformation attribute")
            }
        }
    }
}

impl std::error::Error for ExtractError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExtractError::Io { source, .. } => Some(source),
            ExtractError::Xml(e) => Some(e),
            _ => None,
        }
    }
}

impl From<quick_xml::Error> for ExtractError {
    fn from(e: quick_xml::Error) -> Self {
        ExtractError::Xml(e)
    }
}

/// Schema elements the walker tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Element {
    Root,
    MainJob,
    Usage,
    ArgumentVector,
    Arg,
    Proc,
    Machine,
    Uname,
    Linux,
    Ram,
    Cpu,
    Other,
}

impl Element {
    fn from_local_name(name: &[u8]) -> Self {
        match name {
            b"mainjob" => Element::MainJob,
            b"usage" => Element::Usage,
            b"argument-vector" => Element::ArgumentVector,
            b"arg" => Element::Arg,
            b"proc" => Element::Proc,
            b"machine" => Element::Machine,
            b"uname" => Element::Uname,
            b"linux" => Element::Linux,
            b"ram" => Element::Ram,
            b"cpu" => Element::Cpu,
            _ => Element::Other,
        }
    }
}

/// Parse the kickstart document at `path` into a record.
///
/// Malformed markup after the root element is logged as a warning and yields
/// a record holding only the root-level fields.
pub fn extract(path: &Path, config: &ParserConfig) -> Result<InvocationRecord, ExtractError> {
    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let xml = decode_document(&bytes);

    let mut walker = Walker::new(config);
    let result = walker.run(&xml);

    match (walker.header.take(), result) {
        (None, Err(e)) => Err(e),
        (None, Ok(())) => Err(ExtractError::NoRoot),
        (Some(header), Ok(())) => {
            tracing::debug!(
                transformation = %header.transformation,
                runtime = walker.agg.runtime,
                arguments = walker.agg.arguments.len(),
                "extracted invocation record"
            );
            Ok(walker.agg.into_record(header))
        }
        (Some(mut header), Err(e)) => {
            tracing::warn!(file = %path.display(), "{}: {e}", header.transformation);
            if classify(
                &header.transformation,
                &config.classify.degraded_auxiliary_prefixes,
            ) == JobType::Auxiliary
            {
                header.job_type = JobType::Auxiliary;
            }
            Ok(InvocationRecord::partial(header))
        }
    }
}

struct Walker<'c> {
    config: &'c ParserConfig,
    stack: Vec<Element>,
    header: Option<RecordHeader>,
    agg: Aggregates,
    /// Text of the `arg` element currently open, if any.
    arg_text: Option<String>,
}

impl<'c> Walker<'c> {
    fn new(config: &'c ParserConfig) -> Self {
        Self {
            config,
            stack: Vec::new(),
            header: None,
            agg: Aggregates::default(),
            arg_text: None,
        }
    }

    fn run(&mut self, xml: &str) -> Result<(), ExtractError> {
        let config = self.config;
        let namespace = config.schema.namespace.as_bytes();
        let mut reader = NsReader::from_str(xml);
        let decoder = reader.decoder();

        loop {
            let (ns, event) = reader.read_resolved_event()?;
            let in_schema = matches!(ns, ResolveResult::Bound(Namespace(uri)) if uri == namespace);

            match event {
                Event::Start(e) => self.open(&e, decoder, in_schema)?,
                Event::Empty(e) => {
                    self.open(&e, decoder, in_schema)?;
                    self.close();
                }
                Event::End(_) => self.close(),
                Event::Text(t) => {
                    if let Some(text) = self.arg_text.as_mut() {
                        text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(c) => {
                    if let Some(text) = self.arg_text.as_mut() {
                        text.push_str(&String::from_utf8_lossy(&c));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        if self.stack.is_empty() {
            Ok(())
        } else {
            Err(ExtractError::Truncated {
                open: self.stack.len(),
            })
        }
    }

    fn open(
        &mut self,
        e: &BytesStart,
        decoder: Decoder,
        in_schema: bool,
    ) -> Result<(), ExtractError> {
        if self.header.is_none() {
            self.header = Some(self.read_header(e, decoder)?);
            self.stack.push(Element::Root);
            return Ok(());
        }

        let kind = if in_schema {
            Element::from_local_name(e.local_name().as_ref())
        } else {
            Element::Other
        };
        self.stack.push(kind);

        use Element::*;
        match self.stack.as_slice() {
            [Root, MainJob] => {
                let duration = number(e, decoder, "mainjob", "duration")?;
                self.agg.add_mainjob_duration(duration);
            }
            [Root, MainJob, Usage] => {
                self.agg.add_usage(UsageSample {
                    utime: number(e, decoder, "usage", "utime")?,
                    stime: number(e, decoder, "usage", "stime")?,
                    maxrss: number(e, decoder, "usage", "maxrss")?,
                });
            }
            [Root, MainJob, ArgumentVector, Arg] => {
                self.arg_text = Some(String::new());
            }
            [Root, MainJob, Proc] => {
                self.agg.add_proc(ProcSample {
                    rsspeak: number(e, decoder, "proc", "rsspeak")?,
                    rbytes: number(e, decoder, "proc", "rbytes")?,
                    rchar: number(e, decoder, "proc", "rchar")?,
                    wbytes: number(e, decoder, "proc", "wbytes")?,
                    wchar: number(e, decoder, "proc", "wchar")?,
                    iowait: number(e, decoder, "proc", "iowait")?,
                    maxthreads: number(e, decoder, "proc", "maxthreads")?,
                });
            }
            [Root, Machine, Uname] => {
                let machine = &mut self.agg.machine;
                machine.system = attribute(e, decoder, "system")?;
                machine.architecture = attribute(e, decoder, "machine")?;
                machine.release = attribute(e, decoder, "release")?;
                machine.node_name = attribute(e, decoder, "nodename")?;
            }
            [Root, Machine, Linux, Ram] => {
                let total = number(e, decoder, "ram", "total")?;
                self.agg.machine.rsspeak = Some(total);
            }
            [Root, Machine, Linux, Cpu] => {
                self.agg.machine.cpu = Some(CpuInfo {
                    count: number(e, decoder, "cpu", "count")?,
                    speed: number(e, decoder, "cpu", "speed")?,
                    vendor: attribute(e, decoder, "vendor")?,
                });
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self) {
        if self.stack.pop() == Some(Element::Arg) {
            if let Some(text) = self.arg_text.take() {
                self.agg.add_argument(text);
            }
        }
    }

    /// Root attributes and classification, read before any nested element.
    fn read_header(
        &self,
        root: &BytesStart,
        decoder: Decoder,
    ) -> Result<RecordHeader, ExtractError> {
        let transformation = attribute(root, decoder, "transformation")?
            .ok_or(ExtractError::MissingTransformation)?;
        let job_type = classify(&transformation, &self.config.classify.auxiliary_prefixes);
        Ok(RecordHeader {
            derivation: attribute(root, decoder, "derivation")?,
            start_time: attribute(root, decoder, "start")?,
            job_type,
            transformation,
        })
    }
}

/// Transcode the raw document to UTF-8 using its byte order mark or the
/// `encoding` of its XML declaration. Undeclared documents are read as UTF-8.
fn decode_document(bytes: &[u8]) -> Cow<'_, str> {
    let mut reader = Reader::from_reader(bytes);
    let declared = loop {
        match reader.read_event() {
            Ok(Event::Decl(decl)) => break decl.encoder(),
            Ok(Event::Text(t)) if t.iter().all(u8::is_ascii_whitespace) => continue,
            _ => break None,
        }
    };
    let encoding = declared.unwrap_or(encoding_rs::UTF_8);
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        tracing::debug!(
            encoding = used.name(),
            "document contains bytes invalid in its encoding, replaced"
        );
    }
    text
}

/// Unescaped value of the unprefixed attribute `name`.
fn attribute(
    e: &BytesStart,
    decoder: Decoder,
    name: &str,
) -> Result<Option<String>, ExtractError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == name.as_bytes() {
            return Ok(Some(attr.decode_and_unescape_value(decoder)?.into_owned()));
        }
    }
    Ok(None)
}

fn number<T: FromStr>(
    e: &BytesStart,
    decoder: Decoder,
    element: &'static str,
    name: &'static str,
) -> Result<T, ExtractError> {
    let raw = attribute(e, decoder, name)?.ok_or(ExtractError::Attribute {
        element,
        name,
        value: None,
    })?;
    match raw.trim().parse() {
        Ok(value) => Ok(value),
        Err(_) => Err(ExtractError::Attribute {
            element,
            name,
            value: Some(raw),
        }),
    }
}
