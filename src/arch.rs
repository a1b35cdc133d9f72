//! The architecture descriptor: word size, target OS, symbol mangling and
//! the flags handed to the system assembler and linker.
//!
//! Everything size- or name-dependent in the pipeline goes through this
//! struct, so retargeting (say, 32-bit or Windows naming) is a matter of
//! constructing a different descriptor.

/// The target operating system, which decides symbol mangling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Os {
  /// ELF targets: symbols are emitted under their source name.
  Linux,
  /// PE targets: symbols get a leading underscore.
  Windows,
}

/// A description of the compilation target.
#[derive(Debug)]
pub struct Architecture {
  /// Word size in bytes. Pointer and stack slot size.
  pub wordsize: i32,
  /// Target OS, for name mangling.
  pub os: Os,
  /// Extra flags passed to the assembler.
  pub asflags: &'static [&'static str],
  /// Extra flags passed to the linker driver.
  pub ldflags: &'static [&'static str],
}

impl Architecture {
  /// The default target: AMD64 Linux with the stack-only calling convention.
  #[must_use] pub fn amd64(os: Os) -> Self {
    Architecture {
      wordsize: 8,
      os,
      asflags: &["--64"],
      ldflags: &[],
    }
  }

  /// Mangle a source identifier into its linker name.
  #[must_use] pub fn mangle(&self, ident: &str) -> String {
    match self.os {
      Os::Linux => ident.to_owned(),
      Os::Windows => format!("_{ident}"),
    }
  }

  /// Round `size` up to the next multiple of the word size. Stack slots and
  /// record fields are word-aligned.
  #[must_use] pub fn align_word(&self, size: i32) -> i32 {
    if size <= 0 { return self.wordsize }
    (size + self.wordsize - 1) / self.wordsize * self.wordsize
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn mangling() {
    assert_eq!(Architecture::amd64(Os::Linux).mangle("main"), "main");
    assert_eq!(Architecture::amd64(Os::Windows).mangle("main"), "_main");
  }

  #[test]
  fn word_alignment() {
    let arch = Architecture::amd64(Os::Linux);
    assert_eq!(arch.align_word(1), 8);
    assert_eq!(arch.align_word(8), 8);
    assert_eq!(arch.align_word(12), 16);
    assert_eq!(arch.align_word(0), 8);
  }
}
