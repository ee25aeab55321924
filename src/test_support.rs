//! Shared fixtures for unit tests.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// A complete kickstart record as written by the job wrapper.
pub const SAMPLE_INVOCATION: &str = r#"<?xml version="1.0" encoding="ISO-8859-1"?>
<invocation xmlns="http://pegasus.isi.edu/schema/invocation" xmlns:xsi="http://www.w3.org/2001/XMLSchema-instance" xsi:schemaLocation="http://pegasus.isi.edu/schema/invocation http://pegasus.isi.edu/schema/iv-2.3.xsd" version="2.3" start="2018-03-01T10:00:00.000-08:00" duration="200.512" transformation="diamond::findrange:4.0" derivation="ID0000002" resource="condorpool" wf-label="diamond" hostname="node17" pid="4711">
  <setup start="2018-03-01T10:00:00.000-08:00" duration="0.100">
    <usage utime="9.000" stime="9.000" maxrss="99999" minflt="1" majflt="0" nswap="0"/>
  </setup>
  <mainjob start="2018-03-01T10:00:00.100-08:00" duration="200.000" pid="4712">
    <usage utime="40.000" stime="10.000" maxrss="2048" minflt="100" majflt="0" nswap="0" inblock="0" outblock="8"/>
    <status raw="0"><regular exitcode="0"/></status>
    <statcall error="0">
      <file name="/usr/bin/findrange">7F454C46</file>
      <statinfo mode="0100755" size="8192" inode="1234" nlink="1" blksize="4096" blocks="16" mtime="2018-02-01T00:00:00-08:00" uid="1000" gid="1000"/>
    </statcall>
    <argument-vector>
      <arg nr="1">-a</arg>
      <arg nr="2">findrange</arg>
      <arg nr="3">-i</arg>
      <arg nr="4">f.b1</arg>
    </argument-vector>
    <proc start="1519927200.1" duration="199.9" pid="4712" utime="30.000" stime="8.000" iowait="0.500" vmpeak="200000" rsspeak="100" rbytes="1000" rchar="24" wbytes="2000" wchar="48" syscr="1" syscw="1" maxthreads="2"/>
    <proc start="1519927201.0" duration="100.0" pid="4713" utime="10.000" stime="2.000" iowait="0.250" vmpeak="900000" rsspeak="250" rbytes="10" rchar="5" wbytes="20" wchar="6" syscr="1" syscw="1" maxthreads="1"/>
  </mainjob>
  <cwd>/scratch/run0001</cwd>
  <usage utime="0.010" stime="0.020" maxrss="1024" minflt="10" majflt="0" nswap="0"/>
  <machine page-size="4096">
    <stamp>2018-03-01T10:00:00.000-08:00</stamp>
    <uname system="linux" nodename="node17" release="3.10.0-693.el7.x86_64" machine="x86_64">#1 SMP Tue Aug 22 21:09:27 UTC 2017</uname>
    <linux>
      <ram total="16267956" free="1234567" shared="0" buffer="0"/>
      <swap total="8388604" free="8388604"/>
      <cpu count="8" speed="2400" vendor="GenuineIntel">Intel(R) Xeon(R) CPU E5-2630 v3 @ 2.40GHz</cpu>
      <load min1="0.00" min5="0.01" min15="0.05"/>
    </linux>
  </machine>
  <data><![CDATA[stdout of findrange]]></data>
</invocation>
"#;

/// In-memory sink for formatted log lines.
#[derive(Clone, Default)]
pub struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Run `f` with a scoped subscriber and return its result plus everything logged.
pub fn capture_logs<T>(f: impl FnOnce() -> T) -> (T, String) {
    let buffer = LogBuffer::default();
    let writer = buffer.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, buffer.contents())
}
