/*!
# Mechanical devices

A device is commanded with a vector of `cmd_dof` values of which only the `dof` entries
are driven by the alignment.
The driven entries of all the devices are concatenated into a single full command vector,
each device being assigned a slice of the full command.

Commands are increments: a device is moved to its current position plus the command.
*/

use serde::{Deserialize, Serialize};
use std::{fmt::Display, ops::Range};

use crate::error::{AlignmentError, CapabilityError, Result};

/// Device driver interface
pub trait Actuator {
    /// Moves the device to the given position (blocks until the motion is completed)
    fn move_to(&mut self, position: &[f64]) -> std::result::Result<(), CapabilityError>;
    /// Reads the device position
    fn position(&mut self) -> std::result::Result<Vec<f64>, CapabilityError>;
}

/// Device command layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "LayoutEntry")]
pub struct DeviceLayout {
    pub name: String,
    /// Length of the command vector accepted by the device
    pub cmd_dof: usize,
    /// Indices of the driven degrees of freedom within the device command vector
    pub dof: Vec<usize>,
    /// Location of the driven degrees of freedom in the full command vector
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slice: Option<Range<usize>>,
}

// configuration entry where a missing `dof` drives all the device degrees of freedom
#[derive(Deserialize)]
struct LayoutEntry {
    name: String,
    cmd_dof: usize,
    dof: Option<Vec<usize>>,
    slice: Option<Range<usize>>,
}

impl From<LayoutEntry> for DeviceLayout {
    fn from(entry: LayoutEntry) -> Self {
        Self {
            dof: entry.dof.unwrap_or_else(|| (0..entry.cmd_dof).collect()),
            name: entry.name,
            cmd_dof: entry.cmd_dof,
            slice: entry.slice,
        }
    }
}

impl DeviceLayout {
    /// Creates a layout where all the device degrees of freedom are driven
    pub fn new(name: impl Into<String>, cmd_dof: usize) -> Self {
        Self {
            name: name.into(),
            cmd_dof,
            dof: (0..cmd_dof).collect(),
            slice: None,
        }
    }
    /// Restricts the driven degrees of freedom
    pub fn dof(mut self, dof: Vec<usize>) -> Self {
        self.dof = dof;
        self
    }
    /// Sets the slice of the full command
    pub fn slice(mut self, slice: Range<usize>) -> Self {
        self.slice = Some(slice);
        self
    }
    /// Number of driven degrees of freedom
    pub fn n_dof(&self) -> usize {
        self.dof.len()
    }
    fn validate(&self) -> Result<()> {
        if let Some(i) = self.dof.iter().find(|&&i| i >= self.cmd_dof) {
            return Err(AlignmentError::Layout(format!(
                "{}: degree of freedom #{i} is out of a {} long command",
                self.name, self.cmd_dof
            )));
        }
        for (k, i) in self.dof.iter().enumerate() {
            if self.dof[..k].contains(i) {
                return Err(AlignmentError::Layout(format!(
                    "{}: degree of freedom #{i} is driven twice",
                    self.name
                )));
            }
        }
        Ok(())
    }
    /// Writes the driven degrees of freedom into a device command
    fn embed(&self, sub: &[f64], cmd: &mut [f64]) {
        self.dof.iter().zip(sub).for_each(|(&i, &x)| cmd[i] += x);
    }
    /// Reads the driven degrees of freedom out of a device vector
    fn extract(&self, vector: &[f64]) -> Vec<f64> {
        self.dof.iter().map(|&i| vector[i]).collect()
    }
}

impl Display for DeviceLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (dof {:?} of {}", self.name, self.dof, self.cmd_dof)?;
        if let Some(slice) = &self.slice {
            write!(f, ", full command {slice:?})")
        } else {
            write!(f, ")")
        }
    }
}

struct Device {
    layout: DeviceLayout,
    range: Range<usize>,
    driver: Box<dyn Actuator>,
}

impl Device {
    fn read(&mut self, id: usize) -> Result<Vec<f64>> {
        let position = self
            .driver
            .position()
            .map_err(|source| AlignmentError::Readout {
                device: id,
                name: self.layout.name.clone(),
                source,
            })?;
        if position.len() != self.layout.cmd_dof {
            return Err(AlignmentError::DeviceShape {
                device: id,
                name: self.layout.name.clone(),
                expected: self.layout.cmd_dof,
                found: position.len(),
            });
        }
        Ok(position)
    }
    fn move_to(&mut self, id: usize, position: &[f64]) -> Result<()> {
        log::debug!("commanding {:?} to {}", position, self.layout.name);
        self.driver
            .move_to(position)
            .map_err(|source| AlignmentError::Actuation {
                device: id,
                name: self.layout.name.clone(),
                source,
            })
    }
}

/// Devices positions
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot(Vec<Vec<f64>>);

impl Snapshot {
    /// Devices positions in declaration order
    pub fn positions(&self) -> &[Vec<f64>] {
        &self.0
    }
}

/// Mapping between the full command and the devices
pub struct DeviceCommandMapper {
    devices: Vec<Device>,
    n_dof: usize,
    skip_null: bool,
}

impl DeviceCommandMapper {
    /// Creates a new mapper from the devices layout and drivers
    ///
    /// Devices without a slice are given the next slice in declaration order.
    /// The slices must cover the full command without overlapping.
    pub fn new(devices: Vec<(DeviceLayout, Box<dyn Actuator>)>) -> Result<Self> {
        let mut start = 0;
        let mut ranges = vec![];
        for (layout, _) in &devices {
            layout.validate()?;
            let range = match &layout.slice {
                Some(slice) if slice.len() != layout.n_dof() => {
                    return Err(AlignmentError::Layout(format!(
                        "{}: slice {slice:?} does not match {} degrees of freedom",
                        layout.name,
                        layout.n_dof()
                    )))
                }
                Some(slice) => slice.clone(),
                None => start..start + layout.n_dof(),
            };
            start = range.end;
            ranges.push(range);
        }
        let n_dof: usize = devices.iter().map(|(layout, _)| layout.n_dof()).sum();
        let mut covered = vec![0usize; n_dof];
        for range in &ranges {
            if range.start > range.end || range.end > n_dof {
                return Err(AlignmentError::Layout(format!(
                    "slice {range:?} is out of the {n_dof} long full command"
                )));
            }
            covered[range.clone()].iter_mut().for_each(|c| *c += 1);
        }
        if let Some(i) = covered.iter().position(|&c| c != 1) {
            return Err(AlignmentError::Layout(format!(
                "full command entry #{i} is assigned to {} devices",
                covered[i]
            )));
        }
        let devices: Vec<_> = devices
            .into_iter()
            .zip(ranges)
            .map(|((layout, driver), range)| Device {
                layout,
                range,
                driver,
            })
            .collect();
        log::info!(
            "{} devices with {n_dof} degrees of freedom: {}",
            devices.len(),
            devices
                .iter()
                .map(|d| d.layout.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(Self {
            devices,
            n_dof,
            skip_null: true,
        })
    }
    /// Sets whether devices with a zero command are left untouched (default: `true`)
    pub fn skip_null_commands(mut self, skip_null: bool) -> Self {
        self.skip_null = skip_null;
        self
    }
    /// Length of the full command
    pub fn n_dof(&self) -> usize {
        self.n_dof
    }
    pub fn n_devices(&self) -> usize {
        self.devices.len()
    }
    /// Device names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(|d| d.layout.name.as_str())
    }
    /// Device layouts in declaration order
    pub fn layouts(&self) -> impl Iterator<Item = &DeviceLayout> {
        self.devices.iter().map(|d| &d.layout)
    }
    fn check(&self, context: &str, cmd: &[f64]) -> Result<()> {
        if cmd.len() != self.n_dof {
            Err(AlignmentError::command_shape(context, self.n_dof, cmd.len()))
        } else {
            Ok(())
        }
    }
    /// Splits the full command into the devices commands
    pub fn split(&self, cmd: &[f64]) -> Result<Vec<Vec<f64>>> {
        self.check("split", cmd)?;
        Ok(self
            .devices
            .iter()
            .map(|d| cmd[d.range.clone()].to_vec())
            .collect())
    }
    /// Merges the devices commands into the full command
    pub fn join(&self, cmds: &[Vec<f64>]) -> Result<Vec<f64>> {
        if cmds.len() != self.devices.len() {
            return Err(AlignmentError::command_shape(
                "join (number of devices)",
                self.devices.len(),
                cmds.len(),
            ));
        }
        let mut full = vec![0f64; self.n_dof];
        for (d, cmd) in self.devices.iter().zip(cmds) {
            if cmd.len() != d.layout.n_dof() {
                return Err(AlignmentError::command_shape(
                    format!("join ({})", d.layout.name),
                    d.layout.n_dof(),
                    cmd.len(),
                ));
            }
            full[d.range.clone()].copy_from_slice(cmd);
        }
        Ok(full)
    }
    /// Applies the full command to the devices
    ///
    /// Each device is moved by its share of the command, in declaration order.
    pub fn apply(&mut self, cmd: &[f64]) -> Result<()> {
        self.check("apply", cmd)?;
        let skip_null = self.skip_null;
        for (id, device) in self.devices.iter_mut().enumerate() {
            let sub = &cmd[device.range.clone()];
            if skip_null && sub.iter().all(|x| *x == 0f64) {
                log::debug!("skipping null command for {}", device.layout.name);
                continue;
            }
            let mut position = device.read(id)?;
            device.layout.embed(sub, &mut position);
            device.move_to(id, &position)?;
        }
        Ok(())
    }
    /// Reads the driven degrees of freedom of all the devices into a full command
    pub fn read_all(&mut self) -> Result<Vec<f64>> {
        let mut full = vec![0f64; self.n_dof];
        for (id, device) in self.devices.iter_mut().enumerate() {
            let position = device.read(id)?;
            full[device.range.clone()].copy_from_slice(&device.layout.extract(&position));
        }
        Ok(full)
    }
    /// Records the positions of all the devices
    pub fn snapshot(&mut self) -> Result<Snapshot> {
        self.devices
            .iter_mut()
            .enumerate()
            .map(|(id, device)| device.read(id))
            .collect::<Result<Vec<_>>>()
            .map(Snapshot)
    }
    /// Moves the devices back to the recorded positions
    ///
    /// Devices already at the recorded positions are not moved.
    /// Every device is attempted and the first error is returned.
    pub fn restore(&mut self, snapshot: &Snapshot) -> Result<()> {
        let mut status = Ok(());
        let positions = snapshot.positions();
        for (id, (device, position)) in self.devices.iter_mut().zip(positions).enumerate() {
            let result = device.read(id).and_then(|current| {
                if current == *position {
                    Ok(())
                } else {
                    device.move_to(id, position)
                }
            });
            if let Err(e) = result {
                log::error!("failed to restore {}: {e}", device.layout.name);
                if status.is_ok() {
                    status = Err(e);
                }
            }
        }
        status
    }
}

/// Scoped perturbation of the devices
///
/// The devices positions are recorded when the perturbation is created and they are
/// moved back to these positions by [Perturbation::restore] or when the perturbation is dropped,
/// unless the perturbation is [committed](Perturbation::commit).
pub struct Perturbation<'a> {
    mapper: &'a mut DeviceCommandMapper,
    snapshot: Snapshot,
    offset: Vec<f64>,
    armed: bool,
}

impl<'a> Perturbation<'a> {
    pub fn new(mapper: &'a mut DeviceCommandMapper) -> Result<Self> {
        let snapshot = mapper.snapshot()?;
        let offset = vec![0f64; mapper.n_dof()];
        Ok(Self {
            mapper,
            snapshot,
            offset,
            armed: true,
        })
    }
    /// Offsets the devices from the recorded positions by the given full command
    pub fn set(&mut self, offset: &[f64]) -> Result<()> {
        self.mapper.check("perturbation", offset)?;
        let step: Vec<f64> = offset
            .iter()
            .zip(&self.offset)
            .map(|(o, c)| o - c)
            .collect();
        self.armed = true;
        self.mapper.apply(&step)?;
        self.offset = offset.to_vec();
        Ok(())
    }
    /// Current offset from the recorded positions
    pub fn offset(&self) -> &[f64] {
        &self.offset
    }
    /// Moves the devices back to the recorded positions
    pub fn restore(&mut self) -> Result<()> {
        self.mapper.restore(&self.snapshot)?;
        self.offset.iter_mut().for_each(|o| *o = 0f64);
        self.armed = false;
        Ok(())
    }
    /// Keeps the devices where they are
    pub fn commit(mut self) {
        self.armed = false;
    }
}

impl Drop for Perturbation<'_> {
    fn drop(&mut self) {
        if self.armed {
            log::warn!("restoring devices positions");
            if let Err(e) = self.mapper.restore(&self.snapshot) {
                log::error!("devices restoration failed: {e}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    /// Shared state device
    #[derive(Clone, Default)]
    pub struct Stage {
        pub position: Rc<RefCell<Vec<f64>>>,
        pub moves: Rc<RefCell<usize>>,
        pub fail: Rc<RefCell<bool>>,
    }
    impl Stage {
        pub fn new(n: usize) -> Self {
            Self {
                position: Rc::new(RefCell::new(vec![0.; n])),
                ..Default::default()
            }
        }
    }
    impl Actuator for Stage {
        fn move_to(&mut self, position: &[f64]) -> std::result::Result<(), CapabilityError> {
            if *self.fail.borrow() {
                return Err("stage fault".into());
            }
            *self.moves.borrow_mut() += 1;
            self.position.borrow_mut().copy_from_slice(position);
            Ok(())
        }
        fn position(&mut self) -> std::result::Result<Vec<f64>, CapabilityError> {
            Ok(self.position.borrow().clone())
        }
    }

    fn mapper() -> (DeviceCommandMapper, Vec<Stage>) {
        let stages = vec![Stage::new(6), Stage::new(6), Stage::new(6)];
        let mapper = DeviceCommandMapper::new(vec![
            (
                DeviceLayout::new("Parabola", 6).dof(vec![2, 3, 4]),
                Box::new(stages[0].clone()) as Box<dyn Actuator>,
            ),
            (
                DeviceLayout::new("Reference Mirror", 6).dof(vec![3, 4]),
                Box::new(stages[1].clone()),
            ),
            (
                DeviceLayout::new("M4 Exapode", 6).dof(vec![3, 4]),
                Box::new(stages[2].clone()),
            ),
        ])
        .unwrap();
        (mapper, stages)
    }

    #[test]
    fn split_join() {
        let (mapper, _) = mapper();
        assert_eq!(mapper.n_dof(), 7);
        let cmd: Vec<f64> = (1..=7).map(|x| x as f64).collect();
        let split = mapper.split(&cmd).unwrap();
        assert_eq!(split, vec![vec![1., 2., 3.], vec![4., 5.], vec![6., 7.]]);
        assert_eq!(mapper.join(&split).unwrap(), cmd);
    }

    #[test]
    fn shape_errors() {
        let (mapper, _) = mapper();
        assert!(matches!(
            mapper.split(&[0.; 6]),
            Err(AlignmentError::CommandShape {
                expected: 7,
                found: 6,
                ..
            })
        ));
        assert!(mapper.join(&[vec![0.; 3], vec![0.; 2]]).is_err());
        assert!(mapper.join(&[vec![0.; 3], vec![0.; 3], vec![0.; 2]]).is_err());
    }

    #[test]
    fn apply_increments() {
        let (mut mapper, stages) = mapper();
        mapper.apply(&[1., 2., 3., 0., 0., 0.5, 0.]).unwrap();
        assert_eq!(*stages[0].position.borrow(), vec![0., 0., 1., 2., 3., 0.]);
        assert_eq!(*stages[1].moves.borrow(), 0);
        assert_eq!(*stages[2].position.borrow(), vec![0., 0., 0., 0.5, 0., 0.]);
        mapper.apply(&[1., 0., 0., 0., 0., 0., 0.]).unwrap();
        assert_eq!(*stages[0].position.borrow(), vec![0., 0., 2., 2., 3., 0.]);
        assert_eq!(mapper.read_all().unwrap(), vec![2., 2., 3., 0., 0., 0.5, 0.]);
    }

    #[test]
    fn no_skip() {
        let (mapper, stages) = mapper();
        let mut mapper = mapper.skip_null_commands(false);
        mapper.apply(&[0.; 7]).unwrap();
        assert!(stages.iter().all(|s| *s.moves.borrow() == 1));
    }

    #[test]
    fn perturbation_restores_on_drop() {
        let (mut mapper, stages) = mapper();
        mapper.apply(&[0.1, 0., 0., 0., 0., 0., 0.]).unwrap();
        {
            let mut perturbation = Perturbation::new(&mut mapper).unwrap();
            perturbation.set(&[0., 0., 0., 1., 0., 0., 0.]).unwrap();
            perturbation.set(&[0., 0., 0., -1., 0., 0., 0.]).unwrap();
            assert_eq!(stages[1].position.borrow()[3], -1.);
        }
        assert_eq!(stages[1].position.borrow()[3], 0.);
        assert_eq!(stages[0].position.borrow()[2], 0.1);
    }

    #[test]
    fn snapshot_restore() {
        let (mut mapper, stages) = mapper();
        mapper.apply(&[0., 0.2, 0., 0., 0., 0., 0.]).unwrap();
        let snapshot = mapper.snapshot().unwrap();
        assert_eq!(snapshot.positions().len(), 3);
        assert_eq!(snapshot.positions()[0], vec![0., 0., 0., 0.2, 0., 0.]);
        mapper.apply(&[0., 0., 0., 0., 0., 1., 0.]).unwrap();
        let moves: Vec<usize> = stages.iter().map(|s| *s.moves.borrow()).collect();
        mapper.restore(&snapshot).unwrap();
        assert_eq!(*stages[2].position.borrow(), vec![0.; 6]);
        // devices already in place are left alone
        assert_eq!(*stages[0].moves.borrow(), moves[0]);
        assert_eq!(*stages[2].moves.borrow(), moves[2] + 1);
    }

    #[test]
    fn perturbation_commit() {
        let (mut mapper, stages) = mapper();
        let mut perturbation = Perturbation::new(&mut mapper).unwrap();
        perturbation.set(&[0., 0., 0., 0., 0., 0., 2.]).unwrap();
        perturbation.commit();
        assert_eq!(stages[2].position.borrow()[4], 2.);
    }

    #[test]
    fn invalid_layouts() {
        let overlap = DeviceCommandMapper::new(vec![
            (
                DeviceLayout::new("A", 2).slice(0..2),
                Box::new(Stage::new(2)) as Box<dyn Actuator>,
            ),
            (
                DeviceLayout::new("B", 2).slice(1..3),
                Box::new(Stage::new(2)),
            ),
        ]);
        assert!(matches!(overlap, Err(AlignmentError::Layout(_))));
        let out_of_range = DeviceCommandMapper::new(vec![(
            DeviceLayout::new("A", 2).dof(vec![0, 2]),
            Box::new(Stage::new(2)) as Box<dyn Actuator>,
        )]);
        assert!(matches!(out_of_range, Err(AlignmentError::Layout(_))));
        let swapped = DeviceCommandMapper::new(vec![
            (
                DeviceLayout::new("A", 1).slice(1..2),
                Box::new(Stage::new(1)) as Box<dyn Actuator>,
            ),
            (
                DeviceLayout::new("B", 2).slice(0..1).dof(vec![1]),
                Box::new(Stage::new(2)),
            ),
        ]);
        assert!(swapped.is_ok());
    }
}
