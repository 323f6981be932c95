// In: src/ffi/c_data.rs

use arrow::array::{make_array, Array, ArrayRef, AsArray, StructArray};
use arrow::datatypes::SchemaRef;
use arrow::ffi::{from_ffi, to_ffi, FFI_ArrowArray, FFI_ArrowSchema};
use arrow::record_batch::RecordBatch;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{IntegrityError, Result};

//==================================================================================
// I. Descriptor & Lifetime Token
//==================================================================================

/// A snapshot of the exported C structure, taken at export time.
///
/// Addresses are plain integers so the descriptor can be logged, compared
/// and sent across threads. They stay valid until the export is reclaimed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrayDescriptor {
    /// Address of the first value buffer, if the layout has one.
    pub data_ptr: Option<usize>,
    /// Address of the validity bitmap, if one was exported.
    pub validity_ptr: Option<usize>,
    pub length: usize,
    pub null_count: usize,
    pub offset: usize,
    pub n_buffers: usize,
    pub n_children: usize,
    /// The C data interface format string, e.g. `i` for int32.
    pub format: String,
}

#[derive(Debug, Default)]
struct ExportState {
    released: AtomicBool,
    live_views: AtomicUsize,
}

/// The importer's half of the release handshake.
#[derive(Debug, Clone)]
pub struct LifetimeToken {
    state: Arc<ExportState>,
}

impl LifetimeToken {
    /// Declares that the importer is done with the export. Must be called
    /// exactly once.
    pub fn release(&self) -> Result<()> {
        self.state
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| IntegrityError::LifetimeViolation("token released twice".to_string()))
    }

    pub fn is_released(&self) -> bool {
        self.state.released.load(Ordering::Acquire)
    }
}

//==================================================================================
// II. Export
//==================================================================================

/// An array handed across the C data interface.
///
/// The C structures are consumed by the first import; every later import
/// shares that view without taking the lock again.
#[derive(Debug)]
pub struct ExportedArray {
    pending: Mutex<Option<(FFI_ArrowArray, FFI_ArrowSchema)>>,
    view: OnceLock<ArrayRef>,
    state: Arc<ExportState>,
    descriptor: ArrayDescriptor,
    reclaimed: bool,
}

/// Exports `array` through `FFI_ArrowArray` + `FFI_ArrowSchema`.
///
/// Each call builds fresh C structures, so two exports of one array are
/// independent of each other.
pub fn export_array(array: &ArrayRef) -> Result<ExportedArray> {
    let (ffi_array, ffi_schema) = to_ffi(&array.to_data())?;
    let descriptor = describe(&ffi_array, &ffi_schema);
    log::debug!(
        "exported array format={} len={} nulls={}",
        descriptor.format,
        descriptor.length,
        descriptor.null_count
    );
    Ok(ExportedArray {
        pending: Mutex::new(Some((ffi_array, ffi_schema))),
        view: OnceLock::new(),
        state: Arc::new(ExportState::default()),
        descriptor,
        reclaimed: false,
    })
}

/// Exports a record batch as one struct array.
pub fn export_batch(batch: &RecordBatch) -> Result<ExportedArray> {
    let array: ArrayRef = Arc::new(StructArray::from(batch.clone()));
    export_array(&array)
}

fn describe(array: &FFI_ArrowArray, schema: &FFI_ArrowSchema) -> ArrayDescriptor {
    let format = schema.format().to_string();
    let n_buffers = array.num_buffers();
    let buffer = |i: usize| -> Option<usize> {
        if i < n_buffers {
            let ptr = array.buffer(i);
            (!ptr.is_null()).then_some(ptr as usize)
        } else {
            None
        }
    };
    // Unions and the null type carry no validity bitmap; every other layout
    // puts it in slot 0.
    let has_validity = !(format == "n" || format.starts_with("+u"));
    let (validity_ptr, data_ptr) = if has_validity {
        (buffer(0), buffer(1))
    } else {
        (None, buffer(0))
    };
    ArrayDescriptor {
        data_ptr,
        validity_ptr,
        length: array.len(),
        null_count: array.null_count(),
        offset: array.offset(),
        n_buffers,
        n_children: array.num_children(),
        format,
    }
}

impl ExportedArray {
    pub fn descriptor(&self) -> &ArrayDescriptor {
        &self.descriptor
    }

    pub fn token(&self) -> LifetimeToken {
        LifetimeToken {
            state: self.state.clone(),
        }
    }

    /// Imported views that have not been dropped yet.
    pub fn live_views(&self) -> usize {
        self.state.live_views.load(Ordering::Acquire)
    }

    /// Completes the release handshake and frees the exported memory.
    ///
    /// Fails until the token has been released and every imported view has
    /// been dropped.
    pub fn reclaim(&mut self) -> Result<()> {
        if self.reclaimed {
            return Err(IntegrityError::LifetimeViolation(
                "export already reclaimed".to_string(),
            ));
        }
        if !self.state.released.load(Ordering::Acquire) {
            return Err(IntegrityError::LifetimeViolation(
                "reclaim before the importer released the token".to_string(),
            ));
        }
        let live = self.live_views();
        if live > 0 {
            return Err(IntegrityError::LifetimeViolation(format!(
                "{live} imported views are still alive"
            )));
        }
        self.view.take();
        self.pending.get_mut().take();
        self.reclaimed = true;
        log::debug!("reclaimed export format={}", self.descriptor.format);
        Ok(())
    }
}

//==================================================================================
// III. Import
//==================================================================================

/// A zero-copy view of an export. Dropping it ends the view.
#[derive(Debug)]
pub struct ImportedArray {
    array: ArrayRef,
    state: Arc<ExportState>,
}

impl ImportedArray {
    pub fn array(&self) -> &ArrayRef {
        &self.array
    }
}

impl Drop for ImportedArray {
    fn drop(&mut self) {
        self.state.live_views.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Imports `exported` as a read-only view.
///
/// Safe to call from many threads at once. Importing after the token was
/// released, or after reclaim, is a `LifetimeViolation`.
pub fn import_array(exported: &ExportedArray) -> Result<ImportedArray> {
    let state = exported.state.clone();
    state.live_views.fetch_add(1, Ordering::AcqRel);
    let guard_failed = |message: &str| {
        state.live_views.fetch_sub(1, Ordering::AcqRel);
        IntegrityError::LifetimeViolation(message.to_string())
    };
    if exported.reclaimed {
        return Err(guard_failed("import after reclaim"));
    }
    if state.released.load(Ordering::Acquire) {
        return Err(guard_failed("import after release"));
    }

    let array = match exported.view.get() {
        Some(array) => array.clone(),
        None => match first_import(exported) {
            Ok(array) => array,
            Err(e) => {
                state.live_views.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        },
    };
    Ok(ImportedArray { array, state })
}

fn first_import(exported: &ExportedArray) -> Result<ArrayRef> {
    let mut pending = exported.pending.lock();
    if let Some(array) = exported.view.get() {
        return Ok(array.clone());
    }
    let (ffi_array, ffi_schema) = pending.take().ok_or_else(|| {
        IntegrityError::InternalError("export has neither a view nor C structures".to_string())
    })?;
    // SAFETY: both structures come from `to_ffi` and have not been imported
    // before, so ownership of `ffi_array` moves here exactly once.
    let data = unsafe { from_ffi(ffi_array, &ffi_schema) }?;
    let array = make_array(data);
    // The lock is held, so no other thread can have set the view.
    let _ = exported.view.set(array.clone());
    Ok(array)
}

/// Imports an export made by `export_batch`, reattaching `schema` so that
/// schema-level metadata survives.
pub fn import_batch(exported: &ExportedArray, schema: &SchemaRef) -> Result<RecordBatch> {
    let imported = import_array(exported)?;
    let structs = imported.array().as_struct_opt().ok_or_else(|| {
        IntegrityError::SchemaMismatch(format!(
            "expected an exported struct array, got {}",
            imported.array().data_type()
        ))
    })?;
    let batch = RecordBatch::try_new(schema.clone(), structs.columns().to_vec())?;
    Ok(batch)
}

/// Sends every column of `batch` through export, import, release and
/// reclaim, returning the batch rebuilt from the imported views.
pub fn round_trip_batch(batch: &RecordBatch) -> Result<RecordBatch> {
    let mut exported = export_batch(batch)?;
    let token = exported.token();
    let imported = import_batch(&exported, &batch.schema())?;
    token.release()?;
    exported.reclaim()?;
    Ok(imported)
}
