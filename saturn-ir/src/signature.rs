//! The signature: function and predicate symbols, their sorts, and the
//! weight/precedence assignment consumed by the ordering.

use lalrpop_intern::intern;
use rustc_hash::FxHashMap;

use crate::Identifier;

/// A sort (type) of individuals. Two sorts are built in: the default
/// individual sort and the integers.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Sort {
    pub index: u32,
}

impl Sort {
    pub const INDIVIDUAL: Sort = Sort { index: 0 };
    pub const INT: Sort = Sort { index: 1 };
}

/// A function symbol, identified by its index in the signature.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Functor {
    pub index: u32,
}

/// A predicate symbol. Predicate 0 is always equality.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Predicate {
    pub index: u32,
}

impl Predicate {
    pub const EQUALITY: Predicate = Predicate { index: 0 };
}

/// Interpretations of function symbols known to the (small) arithmetic
/// theory layer. Everything else is uninterpreted.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Interpreted {
    IntConstant(i64),
    Sum,
    Product,
    UnaryMinus,
}

#[derive(Clone, Debug)]
pub struct FunctionSymbol {
    pub name: Identifier,
    pub arity: usize,
    pub arg_sorts: Vec<Sort>,
    pub result_sort: Sort,
    /// KBO weight of the symbol. Variables always weigh 1.
    pub weight: u32,
    /// KBO precedence; higher wins. Assigned in declaration order by
    /// default, which makes later symbols larger.
    pub precedence: u32,
    pub interpreted: Option<Interpreted>,
}

#[derive(Clone, Debug)]
pub struct PredicateSymbol {
    pub name: Identifier,
    pub arity: usize,
    pub arg_sorts: Vec<Sort>,
    pub precedence: u32,
}

#[derive(Clone, Debug)]
pub struct SortData {
    pub name: Identifier,
}

/// The process-wide symbol table. Single-owner: the saturation driver holds
/// it (inside the run context) and threads it by reference.
pub struct Signature {
    functions: Vec<FunctionSymbol>,
    predicates: Vec<PredicateSymbol>,
    sorts: Vec<SortData>,
    int_constants: FxHashMap<i64, Functor>,
    sum: Option<Functor>,
    product: Option<Functor>,
    unary_minus: Option<Functor>,
}

impl Default for Signature {
    fn default() -> Self {
        Signature::new()
    }
}

impl Signature {
    pub fn new() -> Self {
        let mut sig = Signature {
            functions: vec![],
            predicates: vec![],
            sorts: vec![],
            int_constants: FxHashMap::default(),
            sum: None,
            product: None,
            unary_minus: None,
        };
        sig.add_sort("$i");
        sig.add_sort("$int");
        // Equality must be predicate 0; it is the only commutative
        // predicate and the smallest one in the precedence.
        let eq = sig.add_predicate("=", vec![Sort::INDIVIDUAL, Sort::INDIVIDUAL]);
        debug_assert_eq!(eq, Predicate::EQUALITY);
        sig
    }

    pub fn add_sort(&mut self, name: &str) -> Sort {
        let index = self.sorts.len() as u32;
        self.sorts.push(SortData { name: intern(name) });
        Sort { index }
    }

    pub fn add_function(&mut self, name: &str, arg_sorts: Vec<Sort>, result_sort: Sort) -> Functor {
        self.add_function_weighted(name, arg_sorts, result_sort, 1, None)
    }

    pub fn add_constant(&mut self, name: &str, sort: Sort) -> Functor {
        self.add_function(name, vec![], sort)
    }

    pub fn add_function_weighted(
        &mut self,
        name: &str,
        arg_sorts: Vec<Sort>,
        result_sort: Sort,
        weight: u32,
        interpreted: Option<Interpreted>,
    ) -> Functor {
        let index = self.functions.len() as u32;
        self.functions.push(FunctionSymbol {
            name: intern(name),
            arity: arg_sorts.len(),
            arg_sorts,
            result_sort,
            weight,
            precedence: index,
            interpreted,
        });
        Functor { index }
    }

    pub fn add_predicate(&mut self, name: &str, arg_sorts: Vec<Sort>) -> Predicate {
        let index = self.predicates.len() as u32;
        self.predicates.push(PredicateSymbol {
            name: intern(name),
            arity: arg_sorts.len(),
            arg_sorts,
            precedence: index,
        });
        Predicate { index }
    }

    /// The interned functor for an integer constant, created on first use.
    pub fn integer_constant(&mut self, value: i64) -> Functor {
        if let Some(&f) = self.int_constants.get(&value) {
            return f;
        }
        let f = self.add_function_weighted(
            &value.to_string(),
            vec![],
            Sort::INT,
            1,
            Some(Interpreted::IntConstant(value)),
        );
        self.int_constants.insert(value, f);
        f
    }

    pub fn sum(&mut self) -> Functor {
        if let Some(f) = self.sum {
            return f;
        }
        let f = self.add_function_weighted(
            "$sum",
            vec![Sort::INT, Sort::INT],
            Sort::INT,
            1,
            Some(Interpreted::Sum),
        );
        self.sum = Some(f);
        f
    }

    pub fn product(&mut self) -> Functor {
        if let Some(f) = self.product {
            return f;
        }
        let f = self.add_function_weighted(
            "$product",
            vec![Sort::INT, Sort::INT],
            Sort::INT,
            1,
            Some(Interpreted::Product),
        );
        self.product = Some(f);
        f
    }

    pub fn unary_minus(&mut self) -> Functor {
        if let Some(f) = self.unary_minus {
            return f;
        }
        let f = self.add_function_weighted(
            "$uminus",
            vec![Sort::INT],
            Sort::INT,
            1,
            Some(Interpreted::UnaryMinus),
        );
        self.unary_minus = Some(f);
        f
    }

    pub fn function(&self, f: Functor) -> &FunctionSymbol {
        &self.functions[f.index as usize]
    }

    pub fn predicate(&self, p: Predicate) -> &PredicateSymbol {
        &self.predicates[p.index as usize]
    }

    pub fn sort(&self, s: Sort) -> &SortData {
        &self.sorts[s.index as usize]
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn predicate_count(&self) -> usize {
        self.predicates.len()
    }

    pub fn function_weight(&self, f: Functor) -> u32 {
        self.functions[f.index as usize].weight
    }

    pub fn function_precedence(&self, f: Functor) -> u32 {
        self.functions[f.index as usize].precedence
    }

    pub fn predicate_precedence(&self, p: Predicate) -> u32 {
        self.predicates[p.index as usize].precedence
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn equality_is_predicate_zero() {
        let sig = Signature::new();
        assert_eq!(sig.predicate(Predicate::EQUALITY).arity, 2);
    }

    #[test]
    fn integer_constants_are_interned() {
        let mut sig = Signature::new();
        let a = sig.integer_constant(42);
        let b = sig.integer_constant(42);
        assert_eq!(a, b);
        assert_eq!(
            sig.function(a).interpreted,
            Some(Interpreted::IntConstant(42))
        );
    }

    #[test]
    fn precedence_follows_declaration_order() {
        let mut sig = Signature::new();
        let e = sig.add_constant("e", Sort::INDIVIDUAL);
        let f = sig.add_function("f", vec![Sort::INDIVIDUAL], Sort::INDIVIDUAL);
        assert!(sig.function_precedence(f) > sig.function_precedence(e));
    }
}
