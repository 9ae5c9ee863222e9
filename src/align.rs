/// Rounds `value` up to the next multiple of `align`.
///
/// `align` must be a power of two.
///
/// # Examples
///
/// ```rust
/// use rpool::align_to;
///
/// assert_eq!(align_to!(13usize, 8usize), 16);
/// assert_eq!(align_to!(16usize, 8usize), 16);
/// assert_eq!(align_to!(5usize, 1usize), 5);
/// ```
#[macro_export]
macro_rules! align_to {
  ($value:expr, $align:expr) => {
    ($value + $align - 1) & !($align - 1)
  };
}

#[cfg(test)]
mod tests {
  #[test]
  fn test_align_to() {
    for shift in 0..6 {
      let align: usize = 1 << shift;

      for step in 0..10 {
        let sizes = (align * step + 1)..=(align * (step + 1));

        for size in sizes {
          assert_eq!(align * (step + 1), align_to!(size, align));
        }
      }

      assert_eq!(0, align_to!(0usize, align));
    }
  }
}
