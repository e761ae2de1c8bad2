use std::cmp::Ordering;

/// Ascending order over f64 following the IEEE 754 total order
pub fn ascending(a: &f64, b: &f64) -> Ordering {
    a.total_cmp(b)
}

/// Descending counterpart of [`ascending`]
pub fn descending(a: &f64, b: &f64) -> Ordering {
    b.total_cmp(a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_both_ways() {
        let mut v = vec![3.0, 1.0, 2.0];
        v.sort_by(ascending);
        assert_eq!(v, vec![1.0, 2.0, 3.0]);
        v.sort_by(descending);
        assert_eq!(v, vec![3.0, 2.0, 1.0]);
    }
}
