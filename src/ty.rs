//! The type representation: an algebraic value over basic types (named
//! symbols), pointers, arrays and functions.
//!
//! Types are owned values; cloning one is the deep duplicate taken
//! whenever a type is shared across AST nodes or symbols. The `Invalid`
//! type satisfies every classification predicate so that one error does
//! not cascade. If the actual shape matters (say, to read a field), check
//! `is_invalid` first.

use crate::arch::Architecture;
use crate::sym::{SymId, SymTable, SymTag, TypeMask};

/// Array size marker: size not given in the declaration, to be inferred
/// from an initializer. Not a synonym for `*`.
pub const ARRAY_SIZE_UNSPECIFIED: i32 = -1;
/// Array size marker: the size expression was erroneous.
pub const ARRAY_SIZE_ERROR: i32 = -2;

/// The shape of a type.
#[derive(Clone, Debug)]
pub enum TyKind {
  /// A named atom: a built-in type or a struct/union/enum symbol.
  Basic(SymId),
  Ptr(Box<Ty>),
  /// An array of `base`. Negative sizes are the
  /// [`ARRAY_SIZE_UNSPECIFIED`]/[`ARRAY_SIZE_ERROR`] markers.
  Array(Box<Ty>, i32),
  Function {
    ret: Box<Ty>,
    params: Vec<Ty>,
    variadic: bool,
  },
  /// The error type.
  Invalid,
}

/// A type: a shape plus qualifiers.
#[derive(Clone, Debug)]
pub struct Ty {
  pub kind: TyKind,
  pub is_const: bool,
}

impl Ty {
  /// A basic type over the given symbol.
  #[must_use] pub fn basic(sym: SymId) -> Ty {
    Ty { kind: TyKind::Basic(sym), is_const: false }
  }

  /// A pointer to `base`.
  #[must_use] pub fn ptr(base: Ty) -> Ty {
    Ty { kind: TyKind::Ptr(Box::new(base)), is_const: false }
  }

  /// An array of `size` elements of `base`.
  #[must_use] pub fn array(base: Ty, size: i32) -> Ty {
    Ty { kind: TyKind::Array(Box::new(base), size), is_const: false }
  }

  /// A function type.
  #[must_use] pub fn function(ret: Ty, params: Vec<Ty>, variadic: bool) -> Ty {
    Ty { kind: TyKind::Function { ret: Box::new(ret), params, variadic }, is_const: false }
  }

  /// The error type.
  #[must_use] pub fn invalid() -> Ty {
    Ty { kind: TyKind::Invalid, is_const: false }
  }

  /// The same type as a mutable rvalue.
  #[must_use] pub fn derive_from(&self) -> Ty {
    let mut ty = self.clone();
    ty.is_const = false;
    ty
  }

  /// The base of a pointer or the element of an array.
  #[must_use] pub fn derive_base(&self) -> Ty {
    match &self.kind {
      TyKind::Ptr(base) | TyKind::Array(base, _) => (**base).clone(),
      TyKind::Invalid => Ty::invalid(),
      _ => {
        log::error!("derive_base: not a pointer or array");
        Ty::invalid()
      }
    }
  }

  /// The return type of a function (possibly behind a pointer).
  #[must_use] pub fn derive_return(&self) -> Ty {
    match self.callable() {
      Some(TyKind::Function { ret, .. }) => (**ret).clone(),
      _ => Ty::invalid(),
    }
  }

  /// The basic symbol at the root, if this is a basic type.
  #[must_use] pub fn basic_sym(&self) -> Option<SymId> {
    match self.kind {
      TyKind::Basic(sym) => Some(sym),
      _ => None,
    }
  }

  /// The struct/union symbol of a record type, or of a pointer to one.
  #[must_use] pub fn record_sym(&self, syms: &SymTable) -> Option<SymId> {
    let sym = match &self.kind {
      TyKind::Basic(sym) => *sym,
      TyKind::Ptr(base) => base.basic_sym()?,
      _ => return None,
    };
    matches!(syms[sym].tag, SymTag::Struct | SymTag::Union).then_some(sym)
  }

  /// The function shape this type can be called as: a function, or a
  /// pointer to one.
  #[must_use] pub fn callable(&self) -> Option<&TyKind> {
    match &self.kind {
      f @ TyKind::Function { .. } => Some(f),
      TyKind::Ptr(base) => match &base.kind {
        f @ TyKind::Function { .. } => Some(f),
        _ => None,
      },
      _ => None,
    }
  }

  /// The declared element count of an array.
  #[must_use] pub fn array_size(&self) -> i32 {
    match self.kind {
      TyKind::Array(_, size) => size,
      _ => 0,
    }
  }

  /// Overwrite an array's size, once inferred from an initializer.
  pub fn set_array_size(&mut self, size: i32) {
    if let TyKind::Array(_, s) = &mut self.kind { *s = size }
  }

  pub fn is_basic(&self) -> bool {
    matches!(self.kind, TyKind::Basic(_) | TyKind::Invalid)
  }

  pub fn is_ptr(&self) -> bool {
    matches!(self.kind, TyKind::Ptr(_) | TyKind::Invalid)
  }

  pub fn is_array(&self) -> bool {
    matches!(self.kind, TyKind::Array(..) | TyKind::Invalid)
  }

  pub fn is_function(&self) -> bool {
    matches!(self.kind, TyKind::Function { .. } | TyKind::Invalid)
  }

  pub fn is_invalid(&self) -> bool {
    matches!(self.kind, TyKind::Invalid)
  }

  /// Whether the type has a known size: basic types must have completed
  /// aggregates at the root, arrays a completed element.
  pub fn is_complete(&self, syms: &SymTable) -> bool {
    match &self.kind {
      TyKind::Basic(sym) => syms[*sym].complete || syms[*sym].tag == SymTag::Type,
      TyKind::Array(base, _) => base.is_complete(syms),
      _ => true,
    }
  }

  /// Whether this is the `void` type.
  pub fn is_void(&self, syms: &SymTable) -> bool {
    match self.kind {
      TyKind::Basic(sym) => syms[sym].tag == SymTag::Type && syms[sym].size == 0,
      _ => false,
    }
  }

  /// A struct or union, as a value (not behind a pointer).
  pub fn is_record(&self, syms: &SymTable) -> bool {
    match self.kind {
      TyKind::Basic(sym) => matches!(syms[sym].tag, SymTag::Struct | SymTag::Union),
      TyKind::Invalid => true,
      _ => false,
    }
  }

  pub fn is_struct(&self, syms: &SymTable) -> bool {
    match self.kind {
      TyKind::Basic(sym) => syms[sym].tag == SymTag::Struct,
      TyKind::Invalid => true,
      _ => false,
    }
  }

  pub fn is_union(&self, syms: &SymTable) -> bool {
    match self.kind {
      TyKind::Basic(sym) => syms[sym].tag == SymTag::Union,
      TyKind::Invalid => true,
      _ => false,
    }
  }

  /// Not qualified `const`.
  pub fn is_mutable(&self) -> bool {
    !self.is_const
  }

  fn has_capability(&self, syms: &SymTable, bit: TypeMask) -> bool {
    match self.kind {
      TyKind::Invalid => true,
      TyKind::Basic(sym) => syms[sym].type_mask.contains(bit),
      // Pointer arithmetic, ordering, comparison and assignment all exist
      TyKind::Ptr(_) => true,
      TyKind::Array(..) | TyKind::Function { .. } => false,
    }
  }

  pub fn is_numeric(&self, syms: &SymTable) -> bool {
    self.has_capability(syms, TypeMask::NUMERIC)
  }

  pub fn is_ordinal(&self, syms: &SymTable) -> bool {
    self.has_capability(syms, TypeMask::ORDINAL)
  }

  pub fn is_equality(&self, syms: &SymTable) -> bool {
    self.has_capability(syms, TypeMask::EQUALITY)
  }

  pub fn is_assignment(&self, syms: &SymTable) -> bool {
    self.has_capability(syms, TypeMask::ASSIGNMENT)
  }

  pub fn is_condition(&self, syms: &SymTable) -> bool {
    self.has_capability(syms, TypeMask::CONDITION)
  }

  /// Structural equality, qualifiers and array sizes included.
  pub fn is_equal(&self, other: &Ty) -> bool {
    if self.is_const != other.is_const { return false }
    match (&self.kind, &other.kind) {
      (TyKind::Invalid, TyKind::Invalid) => true,
      (TyKind::Basic(l), TyKind::Basic(r)) => l == r,
      (TyKind::Ptr(l), TyKind::Ptr(r)) => l.is_equal(r),
      (TyKind::Array(l, ln), TyKind::Array(r, rn)) => ln == rn && l.is_equal(r),
      (TyKind::Function { ret: lr, params: lp, variadic: lv },
       TyKind::Function { ret: rr, params: rp, variadic: rv }) =>
        lv == rv && lr.is_equal(rr) && lp.len() == rp.len()
        && lp.iter().zip(rp).all(|(l, r)| l.is_equal(r)),
      _ => false,
    }
  }

  /// Whether a value of this type is acceptable where `model` is expected.
  /// Arrays decay to pointers; an unspecified array size matches any
  /// concrete size; qualifiers are ignored; otherwise structural.
  pub fn is_compatible(&self, model: &Ty) -> bool {
    match (&self.kind, &model.kind) {
      (TyKind::Invalid, _) | (_, TyKind::Invalid) => true,
      (TyKind::Basic(l), TyKind::Basic(r)) => l == r,
      (TyKind::Ptr(l), TyKind::Ptr(r)) => l.is_compatible(r),
      // Array-to-pointer decay
      (TyKind::Array(l, _), TyKind::Ptr(r)) => l.is_compatible(r),
      (TyKind::Array(l, ln), TyKind::Array(r, rn)) =>
        (*rn == ARRAY_SIZE_UNSPECIFIED || *ln == ARRAY_SIZE_UNSPECIFIED || ln == rn)
        && l.is_compatible(r),
      (TyKind::Function { ret: lr, params: lp, variadic: lv },
       TyKind::Function { ret: rr, params: rp, variadic: rv }) =>
        lv == rv && lr.is_compatible(rr) && lp.len() == rp.len()
        && lp.iter().zip(rp).all(|(l, r)| l.is_compatible(r)),
      // A function decays to a pointer to itself
      (TyKind::Function { .. }, TyKind::Ptr(r)) => self.is_compatible(r),
      _ => false,
    }
  }

  /// Size in bytes: 0 for void, a word for pointers and functions, element
  /// size times count for arrays, the symbol's size otherwise.
  pub fn size(&self, arch: &Architecture, syms: &SymTable) -> i32 {
    match &self.kind {
      TyKind::Basic(sym) => syms[*sym].size,
      TyKind::Ptr(_) | TyKind::Function { .. } => arch.wordsize,
      TyKind::Array(base, size) => base.size(arch, syms) * (*size).max(0),
      TyKind::Invalid => 0,
    }
  }

  /// Render as C declarator syntax with `embedded` in the name position,
  /// e.g. `int (*x)[5]`.
  pub fn to_str_embed(&self, syms: &SymTable, embedded: &str) -> String {
    match &self.kind {
      TyKind::Invalid => {
        if embedded.is_empty() { "<invalid>".to_owned() }
        else { format!("<invalid> {embedded}") }
      }
      TyKind::Basic(sym) => {
        let sym = &syms[*sym];
        let name = if sym.ident.is_empty() {
          format!("<anonymous {}>", sym.tag.to_str())
        } else {
          sym.ident.clone()
        };
        let qual = if self.is_const { "const " } else { "" };
        if embedded.is_empty() { format!("{qual}{name}") }
        else { format!("{qual}{name} {embedded}") }
      }
      TyKind::Ptr(base) => {
        let qual = if self.is_const { " const" } else { "" };
        let inner = match base.kind {
          // Postfix binds tighter than `*`; parenthesize
          TyKind::Array(..) | TyKind::Function { .. } => format!("(*{qual}{embedded})"),
          _ => format!("*{qual}{embedded}"),
        };
        base.to_str_embed(syms, &inner)
      }
      TyKind::Array(base, size) => {
        let inner = match *size {
          ARRAY_SIZE_UNSPECIFIED => format!("{embedded}[]"),
          n => format!("{embedded}[{n}]"),
        };
        base.to_str_embed(syms, &inner)
      }
      TyKind::Function { ret, params, variadic } => {
        let mut list = params.iter()
          .map(|p| p.to_str(syms))
          .collect::<Vec<_>>()
          .join(", ");
        if *variadic {
          if !list.is_empty() { list.push_str(", ") }
          list.push_str("...");
        }
        ret.to_str_embed(syms, &format!("{embedded}({list})"))
      }
    }
  }

  /// Render as C type syntax, e.g. `int (*)[5]`.
  pub fn to_str(&self, syms: &SymTable) -> String {
    self.to_str_embed(syms, "")
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::sym::SymTable;

  fn table() -> (SymTable, SymId, SymId) {
    let mut syms = SymTable::new();
    let int = syms.create_type(syms.global, "int", 4, TypeMask::INTEGRAL);
    let ch = syms.create_type(syms.global, "char", 1, TypeMask::INTEGRAL);
    (syms, int, ch)
  }

  #[test]
  fn every_type_equals_itself() {
    let (_, int, _) = table();
    let tys = [
      Ty::basic(int),
      Ty::ptr(Ty::basic(int)),
      Ty::array(Ty::basic(int), 5),
      Ty::function(Ty::basic(int), vec![Ty::ptr(Ty::basic(int))], true),
    ];
    for ty in &tys {
      assert!(ty.is_equal(ty));
      assert!(ty.is_compatible(ty));
    }
  }

  #[test]
  fn arrays_decay_to_pointers() {
    let (_, int, ch) = table();
    let arr = Ty::array(Ty::basic(int), 5);
    let ptr = Ty::ptr(Ty::basic(int));
    assert!(arr.is_compatible(&ptr));
    assert!(!arr.is_compatible(&Ty::ptr(Ty::basic(ch))));
    assert!(!arr.is_equal(&ptr));
  }

  #[test]
  fn unspecified_array_size_matches_concrete() {
    let (_, int, _) = table();
    let sized = Ty::array(Ty::basic(int), 5);
    let unsized_ = Ty::array(Ty::basic(int), ARRAY_SIZE_UNSPECIFIED);
    assert!(sized.is_compatible(&unsized_));
    assert!(!sized.is_compatible(&Ty::array(Ty::basic(int), 6)));
  }

  #[test]
  fn invalid_silences_predicates() {
    let (syms, _, _) = table();
    let inv = Ty::invalid();
    assert!(inv.is_ptr() && inv.is_array() && inv.is_function());
    assert!(inv.is_numeric(&syms) && inv.is_condition(&syms));
  }

  #[test]
  fn sizes() {
    let (syms, int, ch) = table();
    let arch = Architecture::amd64(crate::arch::Os::Linux);
    assert_eq!(Ty::basic(int).size(&arch, &syms), 4);
    assert_eq!(Ty::basic(ch).size(&arch, &syms), 1);
    assert_eq!(Ty::ptr(Ty::basic(ch)).size(&arch, &syms), 8);
    assert_eq!(Ty::array(Ty::basic(int), 5).size(&arch, &syms), 20);
  }

  #[test]
  fn declarator_printing() {
    let (syms, int, _) = table();
    assert_eq!(Ty::basic(int).to_str(&syms), "int");
    assert_eq!(Ty::ptr(Ty::basic(int)).to_str_embed(&syms, "x"), "int *x");
    assert_eq!(
      Ty::ptr(Ty::array(Ty::basic(int), 5)).to_str_embed(&syms, "x"),
      "int (*x)[5]");
    assert_eq!(
      Ty::function(Ty::basic(int), vec![Ty::basic(int)], false).to_str_embed(&syms, "f"),
      "int f(int)");
    let mut c = Ty::basic(int);
    c.is_const = true;
    assert_eq!(c.to_str(&syms), "const int");
  }
}
