//! GDB Machine Interface (MI) Parser
//!
//! Classifies single output lines into records and extracts typed data
//! from the payloads of well-known commands.

use crate::gdb::framer::is_prompt;
use crate::gdb::types::*;
use crate::gdb::value::{parse_c_string, MiResult, MiValue};

/// GDB/MI output record
#[derive(Debug, Clone, PartialEq)]
pub enum MiRecord {
    Result {
        token: Option<u64>,
        class: ResultClass,
        data: MiValue,
    },
    Async {
        token: Option<u64>,
        kind: AsyncKind,
        class: String,
        data: MiValue,
    },
    Console(String),
    Target(String),
    Log(String),
    /// A line whose marker is not part of the grammar
    Unknown(String),
}

/// Parse a single line of GDB/MI output
///
/// Returns `None` for empty lines and the prompt. Never fails: malformed
/// payloads come back as empty or partial tuples.
pub fn parse_line(line: &[u8]) -> Option<MiRecord> {
    if line.is_empty() || is_prompt(line) {
        return None;
    }

    let digits = line.iter().take_while(|b| b.is_ascii_digit()).count();
    let token = std::str::from_utf8(&line[..digits])
        .ok()
        .and_then(|s| s.parse::<u64>().ok());
    let rest = &line[digits..];

    let Some((&marker, body)) = rest.split_first() else {
        return Some(MiRecord::Unknown(String::from_utf8_lossy(line).into_owned()));
    };

    let record = match marker {
        b'*' | b'+' | b'=' => {
            let kind = match marker {
                b'*' => AsyncKind::Exec,
                b'+' => AsyncKind::Status,
                _ => AsyncKind::Notify,
            };
            let len = body
                .iter()
                .take_while(|&&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
                .count();
            MiRecord::Async {
                token,
                kind,
                class: String::from_utf8_lossy(&body[..len]).into_owned(),
                data: parse_payload(&body[len..]),
            }
        }
        b'^' => {
            let len = body.iter().take_while(|b| b.is_ascii_lowercase()).count();
            let class = std::str::from_utf8(&body[..len]).unwrap_or_default();
            MiRecord::Result {
                token,
                class: ResultClass::from_name(class),
                data: parse_payload(&body[len..]),
            }
        }
        b'~' => MiRecord::Console(parse_c_string(body).unwrap_or_default()),
        b'@' => MiRecord::Target(parse_c_string(body).unwrap_or_default()),
        b'&' => MiRecord::Log(parse_c_string(body).unwrap_or_default()),
        _ => MiRecord::Unknown(String::from_utf8_lossy(line).into_owned()),
    };
    Some(record)
}

/// The payload after a class name must start with a comma; some debugger
/// builds omit it, in which case the payload is an empty tuple.
fn parse_payload(rest: &[u8]) -> MiValue {
    if rest.first() == Some(&b',') {
        MiValue::parse_results(rest)
    } else {
        MiValue::empty_tuple()
    }
}

fn optional_string(value: &MiValue, name: &str) -> Option<String> {
    value.find_str(name).map(str::to_string)
}

/// Parse a frame tuple, as found in `*stopped` and `-stack-list-frames`
pub fn parse_frame(frame: &MiValue) -> Option<Frame> {
    if !frame.is_valid() {
        return None;
    }
    Some(Frame {
        level: frame.find_u64("level").unwrap_or(0),
        addr: frame.find_child("addr").data().to_string(),
        func: optional_string(frame, "func"),
        file: optional_string(frame, "file"),
        fullname: optional_string(frame, "fullname"),
        line: frame.find_u64("line"),
        from: optional_string(frame, "from"),
    })
}

/// Parse stack frames from stack-list-frames response
pub fn parse_stack_frames(data: &MiValue) -> Vec<Frame> {
    data.find_child("stack")
        .children()
        .iter()
        .filter_map(|item| parse_frame(&item.value))
        .collect()
}

/// Parse thread IDs and the current thread from thread-list-ids response
///
/// `thread-ids` is a tuple whose entries all share the name `thread-id`.
pub fn parse_thread_ids(data: &MiValue) -> (Vec<String>, Option<String>) {
    let ids = data
        .find_child("thread-ids")
        .children()
        .iter()
        .filter_map(|item| item.value.as_str().map(str::to_string))
        .collect();
    (ids, optional_string(data, "current-thread-id"))
}

/// Parse register names from data-list-register-names response
pub fn parse_register_names(data: &MiValue) -> Vec<String> {
    data.find_child("register-names")
        .children()
        .iter()
        .map(|item| item.value.data().to_string())
        .collect()
}

/// Parse register values from data-list-register-values response
///
/// Names come from an earlier `-data-list-register-names`; registers with
/// an empty name are not real registers and are skipped.
pub fn parse_register_values(data: &MiValue, names: &[String]) -> Vec<Register> {
    data.find_child("register-values")
        .children()
        .iter()
        .filter_map(|item| {
            let number = item.value.find_u64("number")?;
            let name = names.get(number as usize).filter(|name| !name.is_empty())?;
            Some(Register {
                number,
                name: name.clone(),
                value: item.value.find_child("value").data().to_string(),
            })
        })
        .collect()
}

/// Parse a `bkpt` tuple
pub fn parse_breakpoint(bkpt: &MiValue) -> Option<Breakpoint> {
    Some(Breakpoint {
        number: optional_string(bkpt, "number")?,
        breakpoint_type: bkpt.find_child("type").data().to_string(),
        disposition: bkpt.find_child("disp").data().to_string(),
        enabled: bkpt.find_str("enabled").map(|s| s == "y").unwrap_or(true),
        addr: optional_string(bkpt, "addr"),
        func: optional_string(bkpt, "func"),
        file: optional_string(bkpt, "file"),
        fullname: optional_string(bkpt, "fullname"),
        line: bkpt.find_u64("line"),
        times: bkpt.find_u64("times").unwrap_or(0),
        original_location: optional_string(bkpt, "original-location"),
        condition: optional_string(bkpt, "cond"),
        ignore_count: bkpt.find_u64("ignore"),
    })
}

/// Parse the breakpoint table from break-list response
pub fn parse_breakpoint_list(data: &MiValue) -> Vec<Breakpoint> {
    data.find_child("BreakpointTable")
        .find_child("body")
        .children()
        .iter()
        .filter(|item| item.variable == "bkpt")
        .filter_map(|item| parse_breakpoint(&item.value))
        .collect()
}

/// Collect `name=value` pairs of a tuple into a list for diagnostics.
pub fn field_names(value: &MiValue) -> Vec<&str> {
    value
        .children()
        .iter()
        .map(|MiResult { variable, .. }| variable.as_str())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> MiRecord {
        parse_line(line.as_bytes()).expect("record")
    }

    #[test]
    fn test_parse_result_done() {
        match parse("^done") {
            MiRecord::Result { token, class, data } => {
                assert_eq!(token, None);
                assert_eq!(class, ResultClass::Done);
                assert_eq!(data, MiValue::empty_tuple());
            }
            _ => panic!("Expected result record"),
        }
    }

    #[test]
    fn test_parse_result_with_token() {
        match parse(r#"12^done,value="5""#) {
            MiRecord::Result { token, class, data } => {
                assert_eq!(token, Some(12));
                assert_eq!(class, ResultClass::Done);
                assert_eq!(data.find_str("value"), Some("5"));
            }
            _ => panic!("Expected result record"),
        }
    }

    #[test]
    fn test_parse_result_unknown_class() {
        match parse("7^weird,a=\"1\"") {
            MiRecord::Result { class, data, .. } => {
                assert_eq!(class, ResultClass::Unknown);
                assert_eq!(data.find_str("a"), Some("1"));
            }
            _ => panic!("Expected result record"),
        }
    }

    #[test]
    fn test_result_without_separator_is_empty_tuple() {
        match parse("3^doneXYZ") {
            MiRecord::Result { class, data, .. } => {
                assert_eq!(class, ResultClass::Done);
                assert_eq!(data, MiValue::empty_tuple());
            }
            _ => panic!("Expected result record"),
        }
    }

    #[test]
    fn test_parse_stopped() {
        match parse(r#"*stopped,reason="breakpoint-hit",frame={addr="0x400",func="main",file="a.cpp",line="3"}"#) {
            MiRecord::Async { kind, class, data, .. } => {
                assert_eq!(kind, AsyncKind::Exec);
                assert_eq!(class, "stopped");
                let frame = parse_frame(data.find_child("frame")).unwrap();
                assert_eq!(frame.file.as_deref(), Some("a.cpp"));
                assert_eq!(frame.line, Some(3));
                assert_eq!(frame.func.as_deref(), Some("main"));
            }
            _ => panic!("Expected async record"),
        }
    }

    #[test]
    fn test_async_without_body() {
        match parse("*stopped") {
            MiRecord::Async { data, .. } => assert_eq!(data, MiValue::empty_tuple()),
            _ => panic!("Expected async record"),
        }
        match parse("=thread-group-added\"junk\"") {
            MiRecord::Async { class, data, .. } => {
                assert_eq!(class, "thread-group-added");
                assert_eq!(data, MiValue::empty_tuple());
            }
            _ => panic!("Expected async record"),
        }
    }

    #[test]
    fn test_parse_notification() {
        match parse(r#"=thread-created,id="2",group-id="i1""#) {
            MiRecord::Async { kind, class, data, .. } => {
                assert_eq!(kind, AsyncKind::Notify);
                assert_eq!(class, "thread-created");
                assert_eq!(data.find_str("group-id"), Some("i1"));
            }
            _ => panic!("Expected notification record"),
        }
    }

    #[test]
    fn test_parse_streams() {
        assert_eq!(parse("~\"Hello\\n\""), MiRecord::Console("Hello\n".to_string()));
        assert_eq!(parse("@\"out\""), MiRecord::Target("out".to_string()));
        assert_eq!(
            parse("&\"warning: x\\n\""),
            MiRecord::Log("warning: x\n".to_string())
        );
    }

    #[test]
    fn test_unknown_marker_and_prompt() {
        assert_eq!(parse("!boom"), MiRecord::Unknown("!boom".to_string()));
        assert_eq!(parse("42"), MiRecord::Unknown("42".to_string()));
        assert_eq!(parse_line(b"(gdb) "), None);
        assert_eq!(parse_line(b""), None);
    }

    #[test]
    fn test_parse_stack_frames() {
        let data = MiValue::parse_results(
            br#",stack=[frame={level="0",addr="0x1",func="f",file="a.c",line="7"},frame={level="1",addr="0x2",func="main",from="/lib/libc.so"}]"#,
        );
        let frames = parse_stack_frames(&data);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].line, Some(7));
        assert_eq!(frames[1].level, 1);
        assert_eq!(frames[1].file, None);
        assert_eq!(frames[1].from.as_deref(), Some("/lib/libc.so"));
    }

    #[test]
    fn test_parse_thread_ids() {
        let data = MiValue::parse_results(
            br#",thread-ids={thread-id="2",thread-id="1"},current-thread-id="1",number-of-threads="2""#,
        );
        let (ids, current) = parse_thread_ids(&data);
        assert_eq!(ids, vec!["2".to_string(), "1".to_string()]);
        assert_eq!(current.as_deref(), Some("1"));
    }

    #[test]
    fn test_parse_registers() {
        let names = parse_register_names(&MiValue::parse_results(
            br#",register-names=["rax","","rip"]"#,
        ));
        assert_eq!(names, vec!["rax", "", "rip"]);

        let values = parse_register_values(
            &MiValue::parse_results(
                br#",register-values=[{number="0",value="0x1"},{number="1",value="0x0"},{number="2",value="0x4004"}]"#,
            ),
            &names,
        );
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].name, "rip");
        assert_eq!(values[1].value, "0x4004");
    }

    #[test]
    fn test_parse_breakpoint_list() {
        let input = r#"^done,BreakpointTable={nr_rows="2",nr_cols="6",hdr=[{width="7",alignment="-1",col_name="number",colhdr="Num"}],body=[bkpt={number="1",type="breakpoint",disp="keep",enabled="y",addr="0x0000000080000080",func="main",file="a.c",line="4",times="2"},bkpt={number="2",type="breakpoint",disp="del",enabled="n",addr="<PENDING>",original-location="foo"}]}"#;
        match parse(input) {
            MiRecord::Result { data, .. } => {
                let bps = parse_breakpoint_list(&data);
                assert_eq!(bps.len(), 2);
                assert_eq!(bps[0].line, Some(4));
                assert_eq!(bps[0].times, 2);
                assert!(!bps[1].enabled);
                assert_eq!(bps[1].original_location.as_deref(), Some("foo"));
            }
            _ => panic!("Expected result record"),
        }
    }

    #[test]
    fn test_field_names_keep_order() {
        let data = MiValue::parse_results(br#",b="1",a="2",b="3""#);
        assert_eq!(field_names(&data), vec!["b", "a", "b"]);
    }
}
