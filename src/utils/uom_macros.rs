#![warn(missing_docs)]
//! Unit constructor macros.
//!
//! `millimeter!(1.0)` creates a [`Length`](uom::si::f64::Length), `millimeter!(x, y, z)` a `Point3` of lengths.
//! The angle macro only has the scalar form.

/// Builds a scalar quantity or a `Point3` of quantities of the given unit.
#[doc(hidden)]
#[macro_export]
macro_rules! quantity {
    ($quantity:ident, $unit:ident, $value:expr) => {
        $quantity::new::<$unit>($value)
    };
    ($quantity:ident, $unit:ident, $x:expr, $y:expr, $z:expr) => {
        nalgebra::Point3::new(
            $quantity::new::<$unit>($x),
            $quantity::new::<$unit>($y),
            $quantity::new::<$unit>($z),
        )
    };
}

/// Length (or point of lengths) in millimeter
#[macro_export]
macro_rules! millimeter {
    ($( $x:expr ),+) => {{
        use uom::si::{f64::Length, length::millimeter};
        $crate::quantity![Length, millimeter, $( $x ),+]
    }};
}
/// Length in micrometer
#[macro_export]
macro_rules! micrometer {
    ($( $x:expr ),+) => {{
        use uom::si::{f64::Length, length::micrometer};
        $crate::quantity![Length, micrometer, $( $x ),+]
    }};
}
/// Length in nanometer
#[macro_export]
macro_rules! nanometer {
    ($( $x:expr ),+) => {{
        use uom::si::{f64::Length, length::nanometer};
        $crate::quantity![Length, nanometer, $( $x ),+]
    }};
}
/// Angle in degree
#[macro_export]
macro_rules! degree {
    ($x:expr) => {{
        use uom::si::{angle::degree, f64::Angle};
        $crate::quantity![Angle, degree, $x]
    }};
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use uom::si::{angle::radian, length::millimeter};

    #[test]
    fn lengths() {
        assert_relative_eq!(millimeter!(3.).get::<millimeter>(), 3.0);
        assert_relative_eq!(micrometer!(0.5876).get::<millimeter>(), 0.5876e-3);
        assert_relative_eq!(nanometer!(587.6).get::<millimeter>(), 0.5876e-3);
    }
    #[test]
    fn angles() {
        assert_relative_eq!(degree!(180.).get::<radian>(), std::f64::consts::PI);
        assert_relative_eq!(degree!(-90.).get::<radian>(), -std::f64::consts::FRAC_PI_2);
    }
    #[test]
    fn points() {
        let p = millimeter!(1., 2., 3.);
        assert_relative_eq!(p.x.get::<millimeter>(), 1.0);
        assert_relative_eq!(p.y.get::<millimeter>(), 2.0);
        assert_relative_eq!(p.z.get::<millimeter>(), 3.0);
        let q = micrometer!(500., 0., -500.);
        assert_relative_eq!(q.z.get::<millimeter>(), -0.5);
    }
}
