//! The user-visible data model.
//!
//! `Data` is a tagged union over the primitive and container kinds that
//! flow through the mesh. Containers nest arbitrarily. The type carries a
//! total order (reals compare by IEEE total ordering), so sets and tables
//! are ordered containers and structural hashing is order-independent by
//! construction.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;

/// An ordered set of data values.
pub type Set = BTreeSet<Data>;

/// An ordered map of unique data keys to data values.
pub type Table = BTreeMap<Data, Data>;

/// A sequence of data values.
pub type Vector = Vec<Data>;

/// Transport protocol of a [`Port`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PortProto {
    Unknown,
    Tcp,
    Udp,
    Icmp,
}

/// A transport-layer port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Port {
    pub number: u16,
    pub proto: PortProto,
}

impl Port {
    #[must_use]
    pub const fn new(number: u16, proto: PortProto) -> Self {
        Self { number, proto }
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.proto {
            PortProto::Unknown => "?",
            PortProto::Tcp => "tcp",
            PortProto::Udp => "udp",
            PortProto::Icmp => "icmp",
        };
        write!(f, "{}/{}", self.number, proto)
    }
}

/// An IP subnet in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Subnet {
    pub network: IpAddr,
    pub length: u8,
}

impl Subnet {
    #[must_use]
    pub const fn new(network: IpAddr, length: u8) -> Self {
        Self { network, length }
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.length)
    }
}

/// A signed duration in nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timespan(pub i64);

impl fmt::Display for Timespan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// Nanoseconds since the UNIX epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Timestamp(pub Timespan);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0 .0)
    }
}

/// A named value of a user-defined enum type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnumValue {
    pub name: String,
}

impl EnumValue {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl fmt::Display for EnumValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Discriminant of a [`Data`] value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    None,
    Boolean,
    Count,
    Integer,
    Real,
    String,
    Address,
    Subnet,
    Port,
    Timestamp,
    Timespan,
    EnumValue,
    Set,
    Table,
    Vector,
}

/// A value of one of several possible primitive or container kinds.
#[derive(Debug, Clone, Default)]
pub enum Data {
    #[default]
    None,
    Boolean(bool),
    Count(u64),
    Integer(i64),
    Real(f64),
    String(String),
    Address(IpAddr),
    Subnet(Subnet),
    Port(Port),
    Timestamp(Timestamp),
    Timespan(Timespan),
    Enum(EnumValue),
    Set(Set),
    Table(Table),
    Vector(Vector),
}

impl Data {
    /// Returns the discriminant of the stored kind.
    #[must_use]
    pub const fn kind(&self) -> DataKind {
        match self {
            Self::None => DataKind::None,
            Self::Boolean(_) => DataKind::Boolean,
            Self::Count(_) => DataKind::Count,
            Self::Integer(_) => DataKind::Integer,
            Self::Real(_) => DataKind::Real,
            Self::String(_) => DataKind::String,
            Self::Address(_) => DataKind::Address,
            Self::Subnet(_) => DataKind::Subnet,
            Self::Port(_) => DataKind::Port,
            Self::Timestamp(_) => DataKind::Timestamp,
            Self::Timespan(_) => DataKind::Timespan,
            Self::Enum(_) => DataKind::EnumValue,
            Self::Set(_) => DataKind::Set,
            Self::Table(_) => DataKind::Table,
            Self::Vector(_) => DataKind::Vector,
        }
    }

    #[must_use]
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    /// Rank used to order values of different kinds.
    const fn rank(&self) -> u8 {
        self.kind() as u8
    }
}

impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Data {}

impl Ord for Data {
    fn cmp(&self, other: &Self) -> Ordering {
        use Data::*;
        match (self, other) {
            (None, None) => Ordering::Equal,
            (Boolean(a), Boolean(b)) => a.cmp(b),
            (Count(a), Count(b)) => a.cmp(b),
            (Integer(a), Integer(b)) => a.cmp(b),
            (Real(a), Real(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Address(a), Address(b)) => a.cmp(b),
            (Subnet(a), Subnet(b)) => a.cmp(b),
            (Port(a), Port(b)) => a.cmp(b),
            (Timestamp(a), Timestamp(b)) => a.cmp(b),
            (Timespan(a), Timespan(b)) => a.cmp(b),
            (Enum(a), Enum(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Table(a), Table(b)) => a.cmp(b),
            (Vector(a), Vector(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Data {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Data {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Self::None => {}
            Self::Boolean(x) => x.hash(state),
            Self::Count(x) => x.hash(state),
            Self::Integer(x) => x.hash(state),
            // Bit-level hashing keeps hashing consistent with total_cmp.
            Self::Real(x) => x.to_bits().hash(state),
            Self::String(x) => x.hash(state),
            Self::Address(x) => x.hash(state),
            Self::Subnet(x) => x.hash(state),
            Self::Port(x) => x.hash(state),
            Self::Timestamp(x) => x.hash(state),
            Self::Timespan(x) => x.hash(state),
            Self::Enum(x) => x.hash(state),
            Self::Set(x) => x.hash(state),
            Self::Table(x) => x.hash(state),
            Self::Vector(x) => x.hash(state),
        }
    }
}

impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn join<'a>(
            f: &mut fmt::Formatter<'_>,
            items: impl Iterator<Item = &'a Data>,
            left: &str,
            right: &str,
        ) -> fmt::Result {
            f.write_str(left)?;
            for (i, x) in items.enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{x}")?;
            }
            f.write_str(right)
        }
        match self {
            Self::None => f.write_str("nil"),
            Self::Boolean(true) => f.write_str("T"),
            Self::Boolean(false) => f.write_str("F"),
            Self::Count(x) => write!(f, "{x}"),
            Self::Integer(x) => write!(f, "{x}"),
            Self::Real(x) => write!(f, "{x}"),
            Self::String(x) => f.write_str(x),
            Self::Address(x) => write!(f, "{x}"),
            Self::Subnet(x) => write!(f, "{x}"),
            Self::Port(x) => write!(f, "{x}"),
            Self::Timestamp(x) => write!(f, "{x}"),
            Self::Timespan(x) => write!(f, "{x}"),
            Self::Enum(x) => write!(f, "{x}"),
            Self::Set(x) => join(f, x.iter(), "{", "}"),
            Self::Table(x) => {
                f.write_str("{")?;
                for (i, (k, v)) in x.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k} -> {v}")?;
                }
                f.write_str("}")
            }
            Self::Vector(x) => join(f, x.iter(), "[", "]"),
        }
    }
}

impl From<bool> for Data {
    fn from(x: bool) -> Self {
        Self::Boolean(x)
    }
}

impl From<u64> for Data {
    fn from(x: u64) -> Self {
        Self::Count(x)
    }
}

impl From<i64> for Data {
    fn from(x: i64) -> Self {
        Self::Integer(x)
    }
}

impl From<f64> for Data {
    fn from(x: f64) -> Self {
        Self::Real(x)
    }
}

impl From<&str> for Data {
    fn from(x: &str) -> Self {
        Self::String(x.to_string())
    }
}

impl From<String> for Data {
    fn from(x: String) -> Self {
        Self::String(x)
    }
}

impl From<IpAddr> for Data {
    fn from(x: IpAddr) -> Self {
        Self::Address(x)
    }
}

impl From<Port> for Data {
    fn from(x: Port) -> Self {
        Self::Port(x)
    }
}

impl From<Subnet> for Data {
    fn from(x: Subnet) -> Self {
        Self::Subnet(x)
    }
}

impl From<Timestamp> for Data {
    fn from(x: Timestamp) -> Self {
        Self::Timestamp(x)
    }
}

impl From<Timespan> for Data {
    fn from(x: Timespan) -> Self {
        Self::Timespan(x)
    }
}

impl From<EnumValue> for Data {
    fn from(x: EnumValue) -> Self {
        Self::Enum(x)
    }
}

impl From<Set> for Data {
    fn from(x: Set) -> Self {
        Self::Set(x)
    }
}

impl From<Table> for Data {
    fn from(x: Table) -> Self {
        Self::Table(x)
    }
}

impl From<Vector> for Data {
    fn from(x: Vector) -> Self {
        Self::Vector(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::hash_map::DefaultHasher;

    fn hash_of(x: &Data) -> u64 {
        let mut h = DefaultHasher::new();
        x.hash(&mut h);
        h.finish()
    }

    #[test]
    fn kinds_order_before_values() {
        assert!(Data::from(true) < Data::from(0u64));
        assert!(Data::from(0u64) < Data::from(-5i64));
        assert_eq!(Data::None.cmp(&Data::None), Ordering::Equal);
    }

    #[test]
    fn reals_use_total_order() {
        assert_eq!(Data::from(f64::NAN), Data::from(f64::NAN));
        assert!(Data::from(-0.0) < Data::from(0.0));
    }

    #[test]
    fn nested_containers_compare_structurally() {
        let a = Data::Vector(vec![Data::from(1u64), Data::Set(Set::from([Data::from("x")]))]);
        let b = Data::Vector(vec![Data::from(1u64), Data::Set(Set::from([Data::from("x")]))]);
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
    }

    #[test]
    fn set_hash_is_insertion_order_independent() {
        let mut a = Set::new();
        a.insert(Data::from(1u64));
        a.insert(Data::from(2u64));
        let mut b = Set::new();
        b.insert(Data::from(2u64));
        b.insert(Data::from(1u64));
        assert_eq!(hash_of(&Data::Set(a)), hash_of(&Data::Set(b)));
    }

    #[test]
    fn display_matches_conventions() {
        assert_eq!(Data::from(true).to_string(), "T");
        assert_eq!(
            Data::Vector(vec![Data::from(1u64), Data::from(false)]).to_string(),
            "[1, F]"
        );
        let mut t = Table::new();
        t.insert(Data::from("k"), Data::from(7u64));
        assert_eq!(Data::Table(t).to_string(), "{k -> 7}");
    }
}
