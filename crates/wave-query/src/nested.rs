//! Nested correlation: a document survives only when the same
//! (entity, attribute) pair appears in every inner clause.

use crate::predicate::Matches;

/// Sorted-merge intersection over the parallel (entity, attribute) arrays of
/// each clause.
pub(crate) fn intersect(clauses: &[Matches]) -> Matches {
    let Some((first, rest)) = clauses.split_first() else {
        return (Vec::new(), Vec::new());
    };

    let mut entity = first.0.clone();
    let mut attribute = first.1.clone();

    for clause in rest {
        let mut cnt = 0usize;
        let (mut x, mut y) = (0usize, 0usize);
        while x < entity.len() && y < clause.0.len() {
            match (entity[x], attribute[x]).cmp(&(clause.0[y], clause.1[y])) {
                std::cmp::Ordering::Equal => {
                    entity[cnt] = entity[x];
                    attribute[cnt] = attribute[x];
                    cnt += 1;
                    x += 1;
                    y += 1;
                }
                std::cmp::Ordering::Less => x += 1,
                std::cmp::Ordering::Greater => y += 1,
            }
        }
        entity.truncate(cnt);
        attribute.truncate(cnt);
        if cnt == 0 {
            break;
        }
    }

    (entity, attribute)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_pair_in_every_clause_survives() {
        let a = (vec![0, 0, 1], vec![1, 3, 1]);
        let b = (vec![0, 1], vec![3, 1]);
        let (entity, attribute) = intersect(&[a, b]);
        assert_eq!(entity, vec![0, 1]);
        assert_eq!(attribute, vec![3, 1]);
    }

    #[test]
    fn same_entity_different_attribute_is_dropped() {
        let a = (vec![0], vec![1]);
        let b = (vec![0], vec![3]);
        let (entity, _) = intersect(&[a, b]);
        assert!(entity.is_empty());
    }

    #[test]
    fn empty_clause_empties_everything() {
        let a = (vec![0, 1], vec![0, 0]);
        let b = (Vec::new(), Vec::new());
        let c = (vec![0], vec![0]);
        let (entity, _) = intersect(&[a, b, c]);
        assert!(entity.is_empty());
    }

    #[test]
    fn no_clauses_is_empty() {
        let (entity, _) = intersect(&[]);
        assert!(entity.is_empty());
    }
}
