use std::fmt;

pub struct HeaderEmitter {
    pub emit_harness_helpers: bool,
}

impl HeaderEmitter {
    pub fn new() -> Self {
        Self {
            emit_harness_helpers: false,
        }
    }

    pub fn emit<W: fmt::Write>(&self, out: &mut W) -> Result<(), fmt::Error> {
        out.write_str(include_str!("../codegen/partials/std.c"))?;
        out.write_char('\n')?;
        out.write_str(include_str!("../codegen/partials/gi.c"))?;
        out.write_char('\n')?;
        out.write_str(include_str!("../codegen/partials/runtime.c"))?;
        out.write_char('\n')?;
        if self.emit_harness_helpers {
            out.write_str(include_str!("../codegen/partials/harness.c"))?;
            out.write_char('\n')?;
        }
        Ok(())
    }
}

impl Default for HeaderEmitter {
    fn default() -> Self {
        HeaderEmitter::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_declares_runtime_and_vector_surface() {
        let mut out = String::new();
        HeaderEmitter::new().emit(&mut out).unwrap();
        for needle in [
            "#include <stdlib.h>",
            "GI_FLOAT32_t",
            "GI_FLOAT16_t",
            "gi_float16_t",
            "} Layout;",
            "} NoconIter;",
            "broadcast_layout",
            "inc_iter",
        ] {
            assert!(out.contains(needle), "missing {needle}");
        }
        assert!(!out.contains("load_raw"));
    }

    #[test]
    fn test_harness_helpers_are_optional() {
        let mut out = String::new();
        HeaderEmitter {
            emit_harness_helpers: true,
        }
        .emit(&mut out)
        .unwrap();
        assert!(out.contains("static int load_raw("));
    }
}
