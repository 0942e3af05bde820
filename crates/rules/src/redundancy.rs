//! The join keys an iterator chain enforces by construction.
//!
//! Extending a chain from a row of one table to the rows of another
//! only produces rows that agree on some key, e.g. the refs of a repository
//! all carry the `repository_id` of that repository.
//! A join predicate comparing that key is therefore redundant once the join is squashed.

use gitql_expr::{BinOp, Expr, FieldRef};

use crate::tables::TableKind::{self, *};

/// The equalities implied by extending `parent` with `child`.
/// Any one of `keys` makes a predicate redundant.
pub struct StructuralKey {
    pub parent: TableKind,
    pub child: TableKind,
    /// Pairs of `(parent column, child column)`
    pub keys: &'static [(&'static str, &'static str)],
}

const fn key(parent: TableKind, child: TableKind, keys: &'static [(&'static str, &'static str)]) -> StructuralKey {
    StructuralKey { parent, child, keys }
}

const REPOSITORY_ID: &[(&str, &str)] = &[("repository_id", "repository_id")];
const COMMIT_HASH: &[(&str, &str)] = &[("commit_hash", "commit_hash")];
const TREE_HASH: &[(&str, &str)] = &[("tree_hash", "tree_hash")];
const BLOB_HASH: &[(&str, &str)] = &[("blob_hash", "blob_hash")];

pub static STRUCTURAL_KEYS: &[StructuralKey] = &[
    key(Repositories, Remotes, REPOSITORY_ID),
    key(Repositories, References, REPOSITORY_ID),
    key(Repositories, RefCommits, REPOSITORY_ID),
    key(Repositories, Commits, REPOSITORY_ID),
    key(Repositories, TreeEntries, REPOSITORY_ID),
    key(Repositories, Blobs, REPOSITORY_ID),
    key(Remotes, References, REPOSITORY_ID),
    key(References, RefCommits, &[("ref_name", "ref_name"), ("commit_hash", "commit_hash")]),
    key(References, Commits, COMMIT_HASH),
    key(References, CommitTrees, COMMIT_HASH),
    key(References, CommitBlobs, COMMIT_HASH),
    key(RefCommits, Commits, COMMIT_HASH),
    key(RefCommits, CommitTrees, COMMIT_HASH),
    key(RefCommits, CommitBlobs, COMMIT_HASH),
    key(Commits, CommitTrees, &[("commit_hash", "commit_hash"), ("tree_hash", "tree_hash")]),
    key(Commits, TreeEntries, TREE_HASH),
    key(Commits, CommitBlobs, COMMIT_HASH),
    key(CommitTrees, TreeEntries, TREE_HASH),
    key(TreeEntries, Blobs, BLOB_HASH),
    key(CommitBlobs, Blobs, BLOB_HASH),
];

/// The column pairs implied by extending `parent` with `child`
pub fn structural_keys(parent: TableKind, child: TableKind) -> &'static [(&'static str, &'static str)] {
    STRUCTURAL_KEYS
        .iter()
        .find(|k| k.parent == parent && k.child == child)
        .map(|k| k.keys)
        .unwrap_or_default()
}

/// Is `expr` implied by a chain that extends `parent` with `child`?
pub fn is_redundant(expr: &Expr, parent: TableKind, child: TableKind) -> bool {
    structural_keys(parent, child)
        .iter()
        .any(|&(a, b)| is_column_eq(expr, (parent.name(), a), (child.name(), b)))
}

/// Is `expr` the equality `lhs = rhs` between two columns, in either order?
pub fn is_column_eq(expr: &Expr, lhs: (&str, &str), rhs: (&str, &str)) -> bool {
    let Expr::BinOp(BinOp::Eq, a, b) = expr else {
        return false;
    };
    let (Expr::Field(a), Expr::Field(b)) = (&**a, &**b) else {
        return false;
    };
    let is = |field: &FieldRef, (table, name): (&str, &str)| &*field.table == table && &*field.name == name;
    (is(a, lhs) && is(b, rhs)) || (is(a, rhs) && is(b, lhs))
}

#[cfg(test)]
mod tests {
    use gitql_expr::{Expr, Type};

    use super::{is_redundant, structural_keys};
    use crate::tables::TableKind::*;

    fn eq(a: (&str, &str), b: (&str, &str)) -> Expr {
        Expr::equals(Expr::field(a.0, a.1, 0, Type::Text), Expr::field(b.0, b.1, 1, Type::Text))
    }

    #[test]
    fn either_operand_order() {
        let expr = eq(("refs", "repository_id"), ("repositories", "repository_id"));
        assert!(is_redundant(&expr, Repositories, References));
        assert!(is_redundant(&eq(("repositories", "repository_id"), ("refs", "repository_id")), Repositories, References));
        // The pair is ordered by hierarchy
        assert!(!is_redundant(&expr, References, Repositories));
    }

    #[test]
    fn alternative_keys() {
        assert!(is_redundant(&eq(("refs", "ref_name"), ("ref_commits", "ref_name")), References, RefCommits));
        assert!(is_redundant(&eq(("refs", "commit_hash"), ("ref_commits", "commit_hash")), References, RefCommits));
        assert!(is_redundant(&eq(("commits", "tree_hash"), ("commit_trees", "tree_hash")), Commits, CommitTrees));
        assert!(!is_redundant(&eq(("refs", "ref_name"), ("ref_commits", "commit_hash")), References, RefCommits));
    }

    #[test]
    fn not_redundant() {
        // Not a column equality
        let lit = Expr::equals(Expr::field("refs", "repository_id", 0, Type::Text), Expr::lit("r"));
        assert!(!is_redundant(&lit, Repositories, References));
        // A pair without a structural key
        assert!(structural_keys(Remotes, Commits).is_empty());
        assert!(!is_redundant(&eq(("remotes", "repository_id"), ("commits", "repository_id")), Remotes, Commits));
        // A different column of the right tables
        assert!(!is_redundant(&eq(("repositories", "repository_id"), ("refs", "ref_name")), Repositories, References));
    }
}
