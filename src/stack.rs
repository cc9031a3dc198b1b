use super::*;

/// Placeholder for a function name or filename that could not be resolved.
pub const UNKNOWN: &str = "[UNKNOWN]";

/// A single resolved frame of a captured call stack.
///
/// The program counter is kept for in-process use only; the structured log
/// carries the symbolic fields.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StackFrame {
  #[serde(skip)]
  pub program_counter: usize,
  #[serde(rename = "Function")]
  pub function: String,
  #[serde(rename = "Filename")]
  pub filename: String,
  #[serde(rename = "LineNo")]
  pub line_no: u32,
}

impl StackFrame {
  #[must_use]
  pub fn new(
    program_counter: usize,
    function: impl Into<String>,
    filename: impl Into<String>,
    line_no: u32,
  ) -> Self {
    Self {
      program_counter,
      function: function.into(),
      filename: filename.into(),
      line_no,
    }
  }

  #[must_use]
  pub fn has_function(&self) -> bool {
    self.function != UNKNOWN
  }

  /// `function (filename:line)`, used as an allocation-site label.
  #[must_use]
  pub fn label(&self) -> String {
    format!("{} ({}:{})", self.function, self.filename, self.line_no)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn serializes_symbolic_fields_only() {
    let frame = StackFrame::new(0xdead, "main", "src/main.rs", 12);
    let json = serde_json::to_string(&frame).expect("serialize");

    assert_eq!(
      json,
      r#"{"Function":"main","Filename":"src/main.rs","LineNo":12}"#
    );
  }

  #[test]
  fn parses_log_frames_without_program_counter() {
    let frame: StackFrame = serde_json::from_str(
      r#"{"Function":"[UNKNOWN]","Filename":"lib.c","LineNo":0}"#,
    )
    .expect("parse");

    assert_eq!(frame.program_counter, 0);
    assert!(!frame.has_function());
    assert_eq!(frame.label(), "[UNKNOWN] (lib.c:0)");
  }
}
