/// Index tuples of a cartesian product, last position varying fastest.
#[derive(Debug, Clone)]
pub(crate) struct Odometer {
    sizes: Vec<usize>,
    cursor: Option<Vec<usize>>,
}

impl Odometer {
    pub(crate) fn new(sizes: Vec<usize>) -> Self {
        let cursor = if sizes.contains(&0) {
            None
        } else {
            Some(vec![0; sizes.len()])
        };
        Self { sizes, cursor }
    }
}

impl Iterator for Odometer {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        let current = self.cursor.clone()?;
        let mut exhausted = true;
        if let Some(cursor) = self.cursor.as_mut() {
            for i in (0..cursor.len()).rev() {
                cursor[i] += 1;
                if cursor[i] < self.sizes[i] {
                    exhausted = false;
                    break;
                }
                cursor[i] = 0;
            }
        }
        if exhausted {
            self.cursor = None;
        }
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_through_the_product() {
        let all: Vec<Vec<usize>> = Odometer::new(vec![2, 3]).collect();
        assert_eq!(all.len(), 6);
        assert_eq!(all[0], vec![0, 0]);
        assert_eq!(all[1], vec![0, 1]);
        assert_eq!(all[5], vec![1, 2]);
    }

    #[test]
    fn empty_axis_yields_nothing_and_no_axes_yield_once() {
        assert_eq!(Odometer::new(vec![2, 0]).count(), 0);
        assert_eq!(Odometer::new(vec![]).count(), 1);
    }
}
