//! Text topology sources: `/proc/cpuinfo` and `cpu=socket,core,thread` property files.

use crate::error::PlatformError;
use affinity_core::{CpuLayout, LogicalCpuDescriptor};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const PROC_CPUINFO: &str = "/proc/cpuinfo";

/// Parses `/proc/cpuinfo` text into descriptors, one per processor block.
///
/// Uses `physical id`, `core id` and `apicid`. Thread ids are counted per (socket, core) in
/// file order. A block without `core id` gets its position as core id.
pub fn parse_cpuinfo(text: &str) -> Result<Vec<LogicalCpuDescriptor>, PlatformError> {
    let mut cpus = Vec::new();
    let mut thread_count: HashMap<(u32, u32), u32> = HashMap::new();
    let mut current: Option<LogicalCpuDescriptor> = None;

    let mut finish = |cpu: LogicalCpuDescriptor, cpus: &mut Vec<LogicalCpuDescriptor>| {
        let count = thread_count.entry((cpu.socket_id, cpu.core_id)).or_default();
        cpus.push(LogicalCpuDescriptor { thread_id: *count, ..cpu });
        *count += 1;
    };

    for line in text.lines() {
        if line.trim().is_empty() {
            if let Some(cpu) = current.take() {
                finish(cpu, &mut cpus);
            }
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        let parse = || {
            value
                .trim()
                .parse::<u32>()
                .map_err(|_| PlatformError::ParseError(format!("invalid {key}: {}", value.trim())))
        };
        let position = cpus.len() as u32;
        let cpu = current.get_or_insert_with(|| LogicalCpuDescriptor::new(0, position, 0));
        match key {
            "physical id" => cpu.socket_id = parse()?,
            "core id" => cpu.core_id = parse()?,
            "apicid" => cpu.apic_id = Some(parse()?),
            _ => {}
        }
    }
    if let Some(cpu) = current.take() {
        finish(cpu, &mut cpus);
    }
    Ok(cpus)
}

/// Parses `cpu=socket,core,thread` lines, stopping at the first missing cpu index.
/// Lines starting with `#` are comments.
pub fn parse_properties(text: &str) -> Result<Vec<LogicalCpuDescriptor>, PlatformError> {
    let mut entries: HashMap<usize, LogicalCpuDescriptor> = HashMap::new();
    for line in text.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (index, value) = line
            .split_once('=')
            .ok_or_else(|| PlatformError::ParseError(format!("expected cpu=socket,core,thread: {line}")))?;
        let index = index
            .trim()
            .parse::<usize>()
            .map_err(|_| PlatformError::ParseError(format!("invalid cpu index: {line}")))?;
        let ids = value
            .split(',')
            .map(|word| word.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| PlatformError::ParseError(format!("invalid ids: {line}")))?;
        let [socket, core, thread] = ids[..] else {
            return Err(PlatformError::ParseError(format!("expected three ids: {line}")));
        };
        entries.insert(index, LogicalCpuDescriptor::new(socket, core, thread));
    }
    Ok((0..).map_while(|i| entries.get(&i).copied()).collect())
}

pub fn read_cpuinfo(path: impl AsRef<Path>) -> Result<Vec<LogicalCpuDescriptor>, PlatformError> {
    parse_cpuinfo(&fs::read_to_string(path)?)
}

pub fn layout_from_cpuinfo(path: impl AsRef<Path>) -> Result<CpuLayout, PlatformError> {
    Ok(CpuLayout::from_descriptors(read_cpuinfo(path)?)?)
}

pub fn layout_from_properties(path: impl AsRef<Path>) -> Result<CpuLayout, PlatformError> {
    Ok(CpuLayout::from_descriptors(parse_properties(&fs::read_to_string(path)?)?)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two sockets, two cores each, hyper-threading on; siblings listed after all first threads.
    fn i7_style() -> String {
        let mut text = String::new();
        let layout = [(0, 0), (0, 1), (1, 0), (1, 1), (0, 0), (0, 1), (1, 0), (1, 1)];
        for (processor, (socket, core)) in layout.iter().enumerate() {
            text.push_str(&format!(
                "processor\t: {processor}\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Xeon(R) CPU\nphysical id\t: {socket}\nsiblings\t: 4\ncore id\t\t: {core}\napicid\t\t: {}\nflags\t\t: fpu vme de pse\n\n",
                processor * 2
            ));
        }
        text
    }

    #[test]
    fn test_parse_cpuinfo() {
        let cpus = parse_cpuinfo(&i7_style()).unwrap();
        assert_eq!(cpus.len(), 8);
        assert_eq!((cpus[2].socket_id, cpus[2].core_id, cpus[2].thread_id), (1, 0, 0));
        assert_eq!((cpus[6].socket_id, cpus[6].core_id, cpus[6].thread_id), (1, 0, 1));
        assert_eq!(cpus[3].apic_id, Some(6));

        let layout = CpuLayout::from_descriptors(cpus).unwrap();
        assert_eq!((layout.sockets(), layout.cores_per_socket(), layout.threads_per_core()), (2, 2, 2));
        assert_eq!(layout.to_string().lines().nth(1), Some("1: CpuInfo{apicId=2, socketId=0, coreId=1, threadId=0}"));
    }

    #[test]
    fn test_missing_trailing_blank_line_and_core_id() {
        let cpus = parse_cpuinfo("processor : 0\n\nprocessor : 1\nphysical id : 0").unwrap();
        assert_eq!(cpus.len(), 2);
        assert_eq!(cpus[0].core_id, 0);
        assert_eq!(cpus[1].core_id, 1);
        assert_eq!(cpus[1].thread_id, 0);
    }

    #[test]
    fn test_bad_number() {
        assert!(matches!(parse_cpuinfo("core id : x\n\n"), Err(PlatformError::ParseError(_))));
    }

    #[test]
    fn test_parse_properties() {
        let text = "# i3 laptop\n0=0,0,0\n1=0,1,0\n2=0,0,1\n3=0,1,1\n5=0,2,0\n";
        let cpus = parse_properties(text).unwrap();
        assert_eq!(cpus.len(), 4);
        assert_eq!(cpus[2], LogicalCpuDescriptor::new(0, 0, 1));
        assert!(CpuLayout::from_descriptors(cpus).is_ok());
        assert!(matches!(parse_properties("0=0,0"), Err(PlatformError::ParseError(_))));
        assert!(matches!(parse_properties("zero=0,0,0"), Err(PlatformError::ParseError(_))));
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_proc_cpuinfo_parses() {
        if let Ok(cpus) = read_cpuinfo(PROC_CPUINFO) {
            assert!(!cpus.is_empty());
        }
    }
}
