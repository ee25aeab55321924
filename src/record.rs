/// Invocation record model: the normalized JSON shape of one kickstart record,
/// the accumulators folded while walking the document, and job classification.
use serde::Serialize;

/// Kind of job an invocation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    /// User workload.
    Compute,
    /// Workflow-engine housekeeping (chmod, directory creation, staging).
    Auxiliary,
}

/// Classify a transformation by name: any matching prefix makes it auxiliary.
pub fn classify(transformation: &str, auxiliary_prefixes: &[String]) -> JobType {
    if auxiliary_prefixes
        .iter()
        .any(|prefix| transformation.starts_with(prefix.as_str()))
    {
        JobType::Auxiliary
    } else {
        JobType::Compute
    }
}

/// Root-level identity of a record, available before any nested element is read.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordHeader {
    pub transformation: String,
    pub derivation: Option<String>,
    pub start_time: Option<String>,
    pub job_type: JobType,
}

/// Normalized output record. Field order is the JSON field order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRecord {
    pub transformation: String,
    pub derivation: Option<String>,
    pub start_time: Option<String>,
    #[serde(rename = "type")]
    pub job_type: JobType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime: Option<f64>,
    #[serde(rename = "avgCPU", skip_serializing_if = "Option::is_none")]
    pub avg_cpu: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub utime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stime: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxrss: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsspeak: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vmpeak: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_read: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_written: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iowait: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maxthreads: Option<u64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<String>,
    /// Reserved: the current schema yields no file entries.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineInfo>,
}

impl InvocationRecord {
    /// Record carrying only the root-level identity, used when the rest of the
    /// document could not be parsed.
    pub fn partial(header: RecordHeader) -> Self {
        Self {
            transformation: header.transformation,
            derivation: header.derivation,
            start_time: header.start_time,
            job_type: header.job_type,
            runtime: None,
            avg_cpu: None,
            utime: None,
            stime: None,
            maxrss: None,
            rsspeak: None,
            vmpeak: None,
            bytes_read: None,
            bytes_written: None,
            iowait: None,
            maxthreads: None,
            arguments: Vec::new(),
            files: Vec::new(),
            machine: None,
        }
    }
}

/// Host description taken from the `machine` element.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,
    /// Total RAM of the host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsspeak: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuInfo>,
}

impl MachineInfo {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuInfo {
    pub count: u64,
    pub speed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
}

/// One `usage` block of a mainjob.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageSample {
    pub utime: f64,
    pub stime: f64,
    pub maxrss: u64,
}

/// One `proc` block of a mainjob.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcSample {
    pub rsspeak: f64,
    pub rbytes: u64,
    pub rchar: u64,
    pub wbytes: u64,
    pub wchar: u64,
    pub iowait: f64,
    pub maxthreads: u64,
}

/// Running totals for a single document walk.
#[derive(Debug, Default)]
pub struct Aggregates {
    /// Sum of mainjob durations, in seconds.
    pub runtime: f64,
    /// Sum of user + system time over every usage block.
    pub total_time: f64,
    pub utime: f64,
    pub stime: f64,
    pub maxrss: u64,
    pub rsspeak: f64,
    pub vmpeak: f64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub iowait: f64,
    pub maxthreads: u64,
    pub arguments: Vec<String>,
    pub files: Vec<String>,
    pub machine: MachineInfo,
}

impl Aggregates {
    pub fn add_mainjob_duration(&mut self, duration: f64) {
        self.runtime += duration;
    }

    /// utime, stime and maxrss are last-write-wins; only the CPU total is summed.
    pub fn add_usage(&mut self, usage: UsageSample) {
        self.total_time += usage.utime + usage.stime;
        self.utime = usage.utime;
        self.stime = usage.stime;
        self.maxrss = usage.maxrss;
    }

    /// vmpeak follows the rsspeak attribute; proc blocks carry no separate
    /// virtual memory peak that is read here. Byte counters saturate at u64::MAX.
    pub fn add_proc(&mut self, proc: ProcSample) {
        self.rsspeak = self.rsspeak.max(proc.rsspeak);
        self.vmpeak = self.vmpeak.max(proc.rsspeak);
        self.bytes_read = self
            .bytes_read
            .saturating_add(proc.rbytes.saturating_add(proc.rchar));
        self.bytes_written = self
            .bytes_written
            .saturating_add(proc.wbytes.saturating_add(proc.wchar));
        self.iowait += proc.iowait;
        self.maxthreads = self.maxthreads.max(proc.maxthreads);
    }

    pub fn add_argument(&mut self, arg: String) {
        self.arguments.push(arg);
    }

    /// Fold the accumulators into the output record, dropping every field that
    /// is still at its identity value.
    pub fn into_record(self, header: RecordHeader) -> InvocationRecord {
        let avg_cpu = average_cpu(self.total_time, self.runtime);
        InvocationRecord {
            runtime: Some(self.runtime),
            avg_cpu,
            utime: positive(self.utime),
            stime: positive(self.stime),
            maxrss: nonzero(self.maxrss),
            rsspeak: positive(self.rsspeak),
            vmpeak: positive(self.vmpeak),
            bytes_read: nonzero(self.bytes_read),
            bytes_written: nonzero(self.bytes_written),
            iowait: positive(self.iowait),
            maxthreads: nonzero(self.maxthreads),
            arguments: self.arguments,
            files: self.files,
            machine: (!self.machine.is_empty()).then_some(self.machine),
            ..InvocationRecord::partial(header)
        }
    }
}

/// CPU utilization in percent, rounded to 4 decimal places.
///
/// None when no CPU time was recorded, or when the runtime is not positive.
pub fn average_cpu(total_time: f64, runtime: f64) -> Option<f64> {
    if total_time <= 0.0 {
        return None;
    }
    if runtime <= 0.0 {
        tracing::warn!(
            total_time,
            runtime,
            "CPU time recorded without a positive runtime, omitting avgCPU"
        );
        return None;
    }
    Some((100.0 * (total_time / runtime) * 10_000.0).round() / 10_000.0)
}

fn positive(value: f64) -> Option<f64> {
    (value > 0.0).then_some(value)
}

fn nonzero(value: u64) -> Option<u64> {
    (value > 0).then_some(value)
}
