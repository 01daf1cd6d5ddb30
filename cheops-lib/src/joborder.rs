//! Reading of `Ipf_Job_Order` XML files.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::logging::Severity;
use crate::time::Utc;
use crate::{Error, Result};

/// A parsed XML element, enough of a DOM for job orders.
#[derive(Debug, Clone, Default, PartialEq)]
struct Element {
    name: String,
    attrs: BTreeMap<String, String>,
    text: String,
    children: Vec<Element>,
}

impl Element {
    fn parse(xml: &str) -> Result<Element> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);
        let mut stack: Vec<Element> = vec![Element::default()];
        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(Element::from_start(&e)?),
                Event::Empty(e) => {
                    let elem = Element::from_start(&e)?;
                    if let Some(parent) = stack.last_mut() {
                        parent.children.push(elem);
                    }
                }
                Event::Text(t) => {
                    if let Some(elem) = stack.last_mut() {
                        elem.text.push_str(&t.unescape()?);
                    }
                }
                Event::CData(t) => {
                    if let Some(elem) = stack.last_mut() {
                        elem.text.push_str(&String::from_utf8_lossy(&t));
                    }
                }
                Event::End(_) => {
                    let elem = stack.pop();
                    match (elem, stack.last_mut()) {
                        (Some(elem), Some(parent)) => parent.children.push(elem),
                        _ => return Err(Error::JobOrder("unbalanced XML".to_string())),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        let document = stack.pop().filter(|_| stack.is_empty());
        document
            .and_then(|mut d| d.children.pop())
            .ok_or_else(|| Error::JobOrder("no XML root element".to_string()))
    }

    fn from_start(e: &BytesStart) -> Result<Element> {
        let mut elem = Element {
            name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
            ..Default::default()
        };
        for attr in e.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            elem.attrs.insert(
                String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
                attr.unescape_value()?.into_owned(),
            );
        }
        Ok(elem)
    }

    fn child(&self, name: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.name == name)
    }

    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.name == name)
    }

    fn text_of(&self, name: &str) -> Option<&str> {
        self.child(name).map(|c| c.text.as_str())
    }

    fn count(&self) -> Option<usize> {
        self.attrs.get("count").and_then(|c| c.trim().parse().ok())
    }
}

/// Replace `${VAR}` references, repeatedly, using `lookup`.
///
/// # Errors
/// [Error::JobOrder] for an undefined variable.
pub fn expand_vars<F>(value: &str, lookup: &F) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let rx = Regex::new(r"\$\{([^}]*)\}").map_err(|e| Error::JobOrder(e.to_string()))?;
    let mut expanded = value.to_string();
    // values may contain further references
    while let Some(caps) = rx.captures(&expanded) {
        let var = &caps[1];
        let Some(replacement) = lookup(var) else {
            return Err(Error::JobOrder(format!(
                "The environment variable {var} is not defined. It is used in the job-order file in this filename / directory: {value}"
            )));
        };
        let range = caps.get(0).map_or(0..0, |m| m.range());
        expanded.replace_range(range, &replacement);
    }
    Ok(expanded)
}

/// Convert a sensing time `yyyymmdd_hhmmssffffff` to a UTC.
///
/// # Errors
/// A malformed value.
pub fn sensing_time_to_utc(time: &str) -> Result<Utc> {
    let valid = time.len() == 21
        && time
            .bytes()
            .enumerate()
            .all(|(i, b)| if i == 8 { b == b'_' } else { b.is_ascii_digit() });
    if !valid {
        return Err(Error::JobOrder(format!(
            "The format of the UTC as string is not as expected. Expected: yyyymmdd_hhmmssffffff but found: {time}"
        )));
    }
    format!(
        "{}-{}-{}T{}:{}:{}.{}",
        &time[0..4],
        &time[4..6],
        &time[6..8],
        &time[9..11],
        &time[11..13],
        &time[13..15],
        &time[15..21]
    )
    .parse()
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "on" | "yes" | "1" | "true" => Ok(true),
        "off" | "no" | "0" | "false" => Ok(false),
        _ => Err(Error::JobOrder(format!(
            "Parameter [{name}] : value = [{value}] cannot be converted to type bool"
        ))),
    }
}

fn cast<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        Error::JobOrder(format!(
            "Parameter [{name}] : value [{value}] cannot be converted to the specified type."
        ))
    })
}

/// Split on whitespace and commas; quoted parts are kept together.
fn split_list(name: &str, value: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut quoted = false;
    for c in value.chars() {
        match c {
            '"' | '\'' => quoted = !quoted,
            c if (c.is_whitespace() || c == ',') && !quoted => {
                if !word.is_empty() {
                    words.push(std::mem::take(&mut word));
                }
            }
            c => word.push(c),
        }
    }
    if quoted {
        return Err(Error::JobOrder(format!(
            "Parameter [{name}] : value [{value}] has unclosed quotation mark."
        )));
    }
    if !word.is_empty() {
        words.push(word);
    }
    Ok(words)
}

/// Configuration and in/out locations of one task read from a job order.
///
/// ```
/// use cheops::joborder::JobOrder;
///
/// let xml = r#"
/// <Ipf_Job_Order>
///   <Ipf_Conf>
///     <Processor_Name>CH_PR</Processor_Name>
///     <Version>1.0</Version>
///     <Stdout_Log_Level>INFO</Stdout_Log_Level>
///     <Stderr_Log_Level>WARNING</Stderr_Log_Level>
///     <Test>false</Test>
///     <Breakpoint_Enable>false</Breakpoint_Enable>
///     <Processing_Station>SOC</Processing_Station>
///   </Ipf_Conf>
///   <List_of_Ipf_Procs count="1">
///     <Ipf_Proc>
///       <Task_Name>tm2prw</Task_Name>
///       <List_of_Inputs count="0"/>
///       <List_of_Outputs count="2">
///         <Output><File_Type>OUT</File_Type><File_Name_Type>Directory</File_Name_Type><File_Name>/out</File_Name></Output>
///         <Output><File_Type>TMP</File_Type><File_Name_Type>Directory</File_Name_Type><File_Name>/tmp</File_Name></Output>
///       </List_of_Outputs>
///     </Ipf_Proc>
///   </List_of_Ipf_Procs>
/// </Ipf_Job_Order>"#;
/// let jo = JobOrder::parse(xml, "tm2prw", "job.xml", |_| None).unwrap();
/// assert_eq!(jo.processor_name(), "CH_PR");
/// assert_eq!(jo.out_dir().unwrap().to_str(), Some("/out"));
/// ```
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct JobOrder {
    source: String,
    params: BTreeMap<String, String>,
    inputs: BTreeMap<String, Vec<String>>,
    out_dir: Option<PathBuf>,
    tmp_dir: Option<PathBuf>,
}

impl JobOrder {
    /// Read the job order file for `task`, expanding environment variables.
    ///
    /// # Errors
    /// I/O failures or see [JobOrder::parse].
    pub fn read<P: AsRef<Path>>(path: P, task: &str) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::JobOrder(format!(
                "Failed to find job order file {}",
                path.display()
            )));
        }
        info!("Reading the job order file {}", path.display());
        let xml = fs::read_to_string(path)?;
        Self::parse(&xml, task, &path.display().to_string(), |var| {
            std::env::var(var).ok()
        })
    }

    /// Parse a job order. `source` names the file in messages, `env` resolves
    /// `${VAR}` references.
    ///
    /// # Errors
    /// Malformed XML, a missing `Ipf_Conf`, undefined variables or missing
    /// `OUT`/`TMP` directories of the task.
    pub fn parse<F>(xml: &str, task: &str, source: &str, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let root = Element::parse(xml)?;
        if root.name != "Ipf_Job_Order" {
            return Err(Error::JobOrder(format!(
                "expected Ipf_Job_Order but found {} in {source}",
                root.name
            )));
        }
        let mut jo = JobOrder {
            source: source.to_string(),
            ..Default::default()
        };

        let conf = root
            .child("Ipf_Conf")
            .ok_or_else(|| Error::JobOrder(format!("no Ipf_Conf in job-order file {source}")))?;
        jo.read_conf(conf)?;

        let mut found = false;
        let mut processes = 0;
        if let Some(procs) = root.child("List_of_Ipf_Procs") {
            for proc in procs.children("Ipf_Proc") {
                processes += 1;
                if proc.text_of("Task_Name").map(str::trim) != Some(task) {
                    continue;
                }
                found = true;
                if let Some(inputs) = proc.child("List_of_Inputs") {
                    jo.read_inputs(inputs, task, &env)?;
                }
                let outputs = proc.child("List_of_Outputs").cloned().unwrap_or_default();
                jo.read_outputs(&outputs, task, &env)?;
            }
            if procs.count().is_some_and(|c| c != processes) {
                warn!(
                    "Found data for {processes} processes in job-order file {source}, but expected data for {} processes.",
                    procs.count().unwrap_or_default()
                );
            }
        }
        if !found {
            warn!("There is no entry for program {task} in the job order file {source}");
        }
        Ok(jo)
    }

    fn read_conf(&mut self, conf: &Element) -> Result<()> {
        for name in [
            "Processor_Name",
            "Version",
            "Stdout_Log_Level",
            "Stderr_Log_Level",
            "Processing_Station",
        ] {
            self.params
                .insert(name.to_string(), conf.text_of(name).unwrap_or("").trim().to_string());
        }
        for name in ["Test", "Breakpoint_Enable"] {
            let value = match conf.text_of(name) {
                Some(v) => parse_bool(name, v)?,
                None => false,
            };
            self.params
                .insert(name.to_string(), if value { "1" } else { "0" }.to_string());
        }
        if let Some(sensing) = conf.child("Sensing_Time") {
            for (tag, key) in [("Start", "Start"), ("Stop", "Stop")] {
                let utc = sensing_time_to_utc(sensing.text_of(tag).unwrap_or("").trim())?;
                self.params.insert(key.to_string(), utc.to_string());
            }
        }
        if let Some(dynamic) = conf.child("Dynamic_Processing_Parameters") {
            for param in dynamic.children("Processing_Parameter") {
                if let Some(name) = param.text_of("Name") {
                    self.params.insert(
                        name.trim().to_string(),
                        param.text_of("Value").unwrap_or("").trim().to_string(),
                    );
                }
            }
        }
        Ok(())
    }

    fn read_inputs<F>(&mut self, inputs: &Element, task: &str, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let types = inputs.children("Input").count();
        if inputs.count().is_some_and(|c| c != types) {
            warn!(
                "Found {types} types of Inputs of process {task} in job-order file {} but expected {} types of Inputs.",
                self.source,
                inputs.count().unwrap_or_default()
            );
        }
        for input in inputs.children("Input") {
            if input.text_of("File_Name_Type").map(str::trim) != Some("Physical") {
                continue;
            }
            let file_type = input.text_of("File_Type").unwrap_or("").trim().to_string();
            let files = self.inputs.entry(file_type.clone()).or_default();
            let Some(names) = input.child("List_of_File_Names") else {
                continue;
            };
            let mut count = 0;
            for name in names.children("File_Name") {
                let mut path = expand_vars(name.text.trim(), env)?;
                if !path.is_empty() && (path.ends_with(".fits") || path.ends_with(".fits.gz")) {
                    path.push_str(&format!("[{file_type}]"));
                }
                files.push(path);
                count += 1;
            }
            if names.count().is_some_and(|c| c != count) {
                warn!(
                    "Found {count} file names of File_Type {file_type} of process {task} in job-order file {} but expected {} file names.",
                    self.source,
                    names.count().unwrap_or_default()
                );
            }
        }
        Ok(())
    }

    fn read_outputs<F>(&mut self, outputs: &Element, task: &str, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut count = 0;
        for output in outputs.children("Output") {
            count += 1;
            if output.text_of("File_Name_Type").map(str::trim) != Some("Directory") {
                continue;
            }
            let dir = PathBuf::from(expand_vars(output.text_of("File_Name").unwrap_or("").trim(), env)?);
            match output.text_of("File_Type").map(str::trim) {
                Some("OUT") => self.out_dir = Some(dir),
                Some("TMP") => self.tmp_dir = Some(dir),
                _ => {}
            }
        }
        if outputs.count().is_some_and(|c| c != count) {
            warn!(
                "Found {count} types of Outputs of process {task} in job-order file {} but expected {} types of Outputs.",
                self.source,
                outputs.count().unwrap_or_default()
            );
        }
        for (kind, dir) in [("OUT", &self.out_dir), ("TMP", &self.tmp_dir)] {
            if dir.is_none() {
                return Err(Error::JobOrder(format!(
                    "{kind} directory for process {task} is not defined in job-order file {}",
                    self.source
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn processor_name(&self) -> &str {
        self.params.get("Processor_Name").map_or("", String::as_str)
    }

    #[must_use]
    pub fn version(&self) -> &str {
        self.params.get("Version").map_or("", String::as_str)
    }

    #[must_use]
    pub fn processing_station(&self) -> &str {
        self.params.get("Processing_Station").map_or("", String::as_str)
    }

    /// # Errors
    /// An unknown level name.
    pub fn stdout_log_level(&self) -> Result<Severity> {
        self.get_str("Stdout_Log_Level")?.parse()
    }

    /// # Errors
    /// An unknown level name.
    pub fn stderr_log_level(&self) -> Result<Severity> {
        self.get_str("Stderr_Log_Level")?.parse()
    }

    /// `Sensing_Time/Start` and `Stop`, if given.
    #[must_use]
    pub fn sensing_time(&self) -> Option<(Utc, Utc)> {
        let start = self.params.get("Start")?.parse().ok()?;
        let stop = self.params.get("Stop")?.parse().ok()?;
        Some((start, stop))
    }

    #[must_use]
    pub fn out_dir(&self) -> Option<&Path> {
        self.out_dir.as_deref()
    }

    #[must_use]
    pub fn tmp_dir(&self) -> Option<&Path> {
        self.tmp_dir.as_deref()
    }

    /// Input files of a `File_Type`.
    ///
    /// # Errors
    /// The type is not listed in the job order.
    pub fn input_files(&self, file_type: &str) -> Result<&[String]> {
        self.inputs.get(file_type).map(Vec::as_slice).ok_or_else(|| {
            Error::JobOrder(format!(
                "Input data structure [{file_type}] is not defined in the job order file."
            ))
        })
    }

    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// # Errors
    /// The parameter does not exist.
    pub fn get_str(&self, name: &str) -> Result<&str> {
        self.params.get(name).map(String::as_str).ok_or_else(|| {
            Error::JobOrder(format!("Parameter [{name}] itself or its value is not defined."))
        })
    }

    /// # Errors
    /// The parameter does not exist or is not an integer.
    pub fn get_int(&self, name: &str) -> Result<i64> {
        cast(name, self.get_str(name)?)
    }

    /// # Errors
    /// The parameter does not exist or is not a number.
    pub fn get_float(&self, name: &str) -> Result<f64> {
        cast(name, self.get_str(name)?)
    }

    /// `on`, `yes`, `1`, `true` and `off`, `no`, `0`, `false`, any case.
    ///
    /// # Errors
    /// The parameter does not exist or is not a boolean.
    pub fn get_bool(&self, name: &str) -> Result<bool> {
        parse_bool(name, self.get_str(name)?)
    }

    /// Values separated by whitespace and/or commas.
    ///
    /// # Errors
    /// The parameter does not exist or an element can not be converted.
    pub fn get_list<T: FromStr>(&self, name: &str) -> Result<Vec<T>> {
        split_list(name, self.get_str(name)?)?
            .iter()
            .map(|v| cast(name, v))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use test_case::test_case;

    use super::*;

    const JOB_ORDER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<Ipf_Job_Order>
  <Ipf_Conf>
    <Processor_Name>CH_PR100001</Processor_Name>
    <Version>12.1</Version>
    <Stdout_Log_Level>INFO</Stdout_Log_Level>
    <Stderr_Log_Level>WARNING</Stderr_Log_Level>
    <Test>false</Test>
    <Breakpoint_Enable>true</Breakpoint_Enable>
    <Processing_Station>SOC</Processing_Station>
    <Sensing_Time>
      <Start>20200102_030405123456</Start>
      <Stop>20200102_040000000000</Stop>
    </Sensing_Time>
    <Dynamic_Processing_Parameters count="3">
      <Processing_Parameter><Name>threshold</Name><Value>2.5</Value></Processing_Parameter>
      <Processing_Parameter><Name>apids</Name><Value>972, 973 974</Value></Processing_Parameter>
      <Processing_Parameter><Name>verbose</Name><Value>Yes</Value></Processing_Parameter>
    </Dynamic_Processing_Parameters>
  </Ipf_Conf>
  <List_of_Ipf_Procs count="2">
    <Ipf_Proc>
      <Task_Name>other</Task_Name>
      <List_of_Outputs count="0"/>
    </Ipf_Proc>
    <Ipf_Proc>
      <Task_Name>tm2prw</Task_Name>
      <List_of_Inputs count="2">
        <Input>
          <File_Type>SOC_APP_LeapSeconds</File_Type>
          <File_Name_Type>Physical</File_Name_Type>
          <List_of_File_Names count="2">
            <File_Name>${REFS}/leap.fits</File_Name>
            <File_Name>${REFS}/leap.txt</File_Name>
          </List_of_File_Names>
        </Input>
        <Input>
          <File_Type>RAW</File_Type>
          <File_Name_Type>Physical</File_Name_Type>
          <List_of_File_Names count="2">
            <File_Name>/data/frames.dat</File_Name>
          </List_of_File_Names>
        </Input>
      </List_of_Inputs>
      <List_of_Outputs count="2">
        <Output><File_Type>OUT</File_Type><File_Name_Type>Directory</File_Name_Type><File_Name>${WORK}/out</File_Name></Output>
        <Output><File_Type>TMP</File_Type><File_Name_Type>Directory</File_Name_Type><File_Name>/tmp</File_Name></Output>
      </List_of_Outputs>
    </Ipf_Proc>
  </List_of_Ipf_Procs>
</Ipf_Job_Order>"#;

    fn env(var: &str) -> Option<String> {
        match var {
            "REFS" => Some("/refs".to_string()),
            "WORK" => Some("${BASE}/work".to_string()),
            "BASE" => Some("/base".to_string()),
            _ => None,
        }
    }

    fn job_order() -> JobOrder {
        JobOrder::parse(JOB_ORDER, "tm2prw", "job.xml", env).unwrap()
    }

    #[test]
    fn configuration() {
        let jo = job_order();
        assert_eq!(jo.processor_name(), "CH_PR100001");
        assert_eq!(jo.version(), "12.1");
        assert_eq!(jo.processing_station(), "SOC");
        assert_eq!(jo.stdout_log_level().unwrap(), Severity::Info);
        assert_eq!(jo.stderr_log_level().unwrap(), Severity::Warning);
        assert!(!jo.get_bool("Test").unwrap());
        assert!(jo.get_bool("Breakpoint_Enable").unwrap());
        let (start, stop) = jo.sensing_time().unwrap();
        assert_eq!(start.to_string(), "2020-01-02T03:04:05.123456");
        assert_eq!(stop.to_string(), "2020-01-02T04:00:00.000000");
    }

    #[test]
    fn dynamic_parameters() {
        let jo = job_order();
        assert_eq!(jo.get_float("threshold").unwrap(), 2.5);
        assert_eq!(jo.get_list::<u16>("apids").unwrap(), vec![972, 973, 974]);
        assert!(jo.get_bool("verbose").unwrap());
        assert!(jo.get_int("threshold").is_err());
        assert!(jo.get_str("missing").is_err());
    }

    #[test]
    fn inputs_and_outputs() {
        let jo = job_order();
        assert_eq!(
            jo.input_files("SOC_APP_LeapSeconds").unwrap(),
            &[
                "/refs/leap.fits[SOC_APP_LeapSeconds]".to_string(),
                "/refs/leap.txt".to_string()
            ]
        );
        assert_eq!(jo.input_files("RAW").unwrap(), &["/data/frames.dat".to_string()]);
        assert!(jo.input_files("OTHER").is_err());
        assert_eq!(jo.out_dir(), Some(Path::new("/base/work/out")));
        assert_eq!(jo.tmp_dir(), Some(Path::new("/tmp")));
    }

    #[test]
    fn missing_task_only_warns() {
        let jo = JobOrder::parse(JOB_ORDER, "unknown", "job.xml", env).unwrap();
        assert_eq!(jo.out_dir(), None);
        assert_eq!(jo.processor_name(), "CH_PR100001");
    }

    #[test]
    fn missing_output_directory() {
        let err = JobOrder::parse(JOB_ORDER, "other", "job.xml", env).unwrap_err();
        assert_eq!(
            err.to_string(),
            "job order: OUT directory for process other is not defined in job-order file job.xml"
        );
    }

    #[test]
    fn undefined_variable() {
        let err = JobOrder::parse(JOB_ORDER, "tm2prw", "job.xml", |_| None).unwrap_err();
        assert!(err
            .to_string()
            .contains("The environment variable REFS is not defined."));
    }

    #[test_case("20200102_030405123456", true)]
    #[test_case("20200102T030405123456", false)]
    #[test_case("2020010_030405123456", false)]
    #[test_case("20200102_03040512345x", false)]
    fn sensing_time_format(value: &str, valid: bool) {
        assert_eq!(sensing_time_to_utc(value).is_ok(), valid);
    }

    #[test]
    fn quoted_lists() {
        assert_eq!(
            split_list("p", r#"a, "b c",d"#).unwrap(),
            vec!["a".to_string(), "b c".to_string(), "d".to_string()]
        );
        assert!(split_list("p", "'open").is_err());
    }
}
